//! Session State
//!
//! The single record holding everything about one ongoing HealthBot conversation:
//! the chosen topic, the session settings, intermediate results of every stage, the
//! quiz progress, and the append-only transcript.
//!
//! A topic-cycle runs from choosing a topic until the user exits or starts over.
//! [`SessionState::reset`] starts a new cycle while keeping the transcript and
//! the settings fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::IntErrorKind;
use std::str::FromStr;

/// Smallest number of quiz questions a topic-cycle can ask.
pub const MIN_QUESTIONS: usize = 1;
/// Largest number of quiz questions a topic-cycle can ask.
pub const MAX_QUESTIONS: usize = 5;

/// Persona line that opens every transcript.
pub const SYSTEM_PERSONA: &str =
    "You are HealthBot, an AI assistant that helps patients learn about health topics.";

/// Clamps a question count into the supported range.
pub fn clamp_question_count(n: usize) -> usize {
    n.clamp(MIN_QUESTIONS, MAX_QUESTIONS)
}

/// Reads a whole number as a clamped question count. Numbers too large for any
/// integer type saturate to the nearest bound; anything else yields `None`.
pub fn read_question_count(text: &str) -> Option<usize> {
    match text.trim().parse::<i64>() {
        Ok(n) => Some(clamp_question_count(
            usize::try_from(n).unwrap_or(MIN_QUESTIONS),
        )),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(MAX_QUESTIONS),
            IntErrorKind::NegOverflow => Some(MIN_QUESTIONS),
            _ => None,
        },
    }
}

// --- Settings ---

/// Difficulty of quiz questions, or depth of the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown level '{0}', expected easy, medium or hard")]
pub struct UnknownLevel(pub String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" | "low" => Ok(Level::Easy),
            "medium" => Ok(Level::Medium),
            "hard" | "high" => Ok(Level::Hard),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Easy => write!(f, "easy"),
            Level::Medium => write!(f, "medium"),
            Level::Hard => write!(f, "hard"),
        }
    }
}

/// Session-level configuration supplied by the presentation layer.
///
/// The driver keeps the latest value and applies it whenever a topic-cycle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub difficulty: Level,
    pub detail_level: Level,
    pub question_count: usize,
    /// Ask "Ready for the next question?" between quiz questions.
    pub pause_between_questions: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            difficulty: Level::Medium,
            detail_level: Level::Medium,
            question_count: MIN_QUESTIONS,
            pause_between_questions: false,
        }
    }
}

// --- Transcript and quiz records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

/// Verdict extracted from the grader's `Grade:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Fail,
    /// The grader's reply had no recognisable `Grade:` line.
    Ungraded,
}

/// One answered quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRecord {
    pub question: String,
    pub answer: String,
    pub grade: Grade,
    /// The grader's raw markdown reply, shown verbatim in the results.
    pub feedback: String,
}

/// What the user chose at the end of a topic-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    ContinueRelated,
    NewTopic,
    Exit,
}

// --- Session state ---

/// The complete state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub topic: Option<String>,
    pub difficulty: Level,
    pub detail_level: Level,
    pub requested_question_count: usize,
    /// Whether the user already answered the in-dialogue question-count prompt.
    pub question_count_chosen: bool,
    pub current_question_index: usize,
    /// `None` until the search stage ran for this cycle; empty when the search failed.
    pub search_snippets: Option<Vec<String>>,
    pub summary_text: Option<String>,
    pub quiz_wanted: Option<bool>,
    pub quiz_questions: Option<Vec<String>>,
    pub pending_answer: Option<String>,
    pub quiz_records: Vec<QuizRecord>,
    /// Set while the "ready for the next question?" prompt is outstanding.
    pub awaiting_next_question: bool,
    /// Aggregated results message, present once the quiz loop has ended.
    pub quiz_results: Option<String>,
    pub related_topics: Option<Vec<String>>,
    pub next_action: Option<NextAction>,
    pub transcript: Vec<TranscriptEntry>,
}

impl SessionState {
    /// Creates the initial state of a session, with every optional field unset.
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            topic: None,
            difficulty: settings.difficulty,
            detail_level: settings.detail_level,
            requested_question_count: clamp_question_count(settings.question_count),
            question_count_chosen: false,
            current_question_index: 0,
            search_snippets: None,
            summary_text: None,
            quiz_wanted: None,
            quiz_questions: None,
            pending_answer: None,
            quiz_records: Vec::new(),
            awaiting_next_question: false,
            quiz_results: None,
            related_topics: None,
            next_action: None,
            transcript: Vec::new(),
        }
    }

    /// Returns a fresh state for a new topic-cycle.
    ///
    /// The settings fields always survive; the transcript survives only when
    /// `preserve_transcript` is set.
    pub fn reset(&self, preserve_transcript: bool) -> SessionState {
        let mut fresh = SessionState::new(&SessionSettings {
            difficulty: self.difficulty,
            detail_level: self.detail_level,
            question_count: self.requested_question_count,
            pause_between_questions: false,
        });
        if preserve_transcript {
            fresh.transcript = self.transcript.clone();
        }
        fresh
    }

    /// Overwrites the three settings fields. Always legal.
    pub fn apply_settings(&mut self, difficulty: Level, detail_level: Level, question_count: usize) {
        self.difficulty = difficulty;
        self.detail_level = detail_level;
        self.requested_question_count = clamp_question_count(question_count);
    }

    /// Appends a message to the transcript.
    pub fn record(&mut self, role: Role, content: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            role,
            content: content.into(),
        });
    }

    /// The question the quiz is currently positioned at, if it exists.
    pub fn current_question(&self) -> Option<&str> {
        self.quiz_questions
            .as_ref()
            .and_then(|questions| questions.get(self.current_question_index))
            .map(String::as_str)
    }
}
