//! Best-effort interpretation of user input and model output.
//!
//! Nothing in here fails: every irregular input resolves to a documented default.

use crate::session_state::{Grade, read_question_count};
use serde_json::Value;

const AFFIRMATIVE: [&str; 5] = ["yes", "y", "sure", "ok", "okay"];
const EXIT_WORDS: [&str; 4] = ["exit", "quit", "bye", "goodbye"];
const NEW_TOPIC_WORDS: [&str; 2] = ["new", "new topic"];
const RESET_WORDS: [&str; 3] = ["restart", "new", "new topic"];

/// Placeholder suggestions used when the model's related-topics reply is unusable.
pub const FALLBACK_RELATED_TOPICS: [&str; 3] = [
    "Healthy eating and nutrition",
    "Exercise and physical activity",
    "Preventive care and regular check-ups",
];

fn normalized(input: &str) -> String {
    input.trim().to_lowercase()
}

pub fn is_affirmative(input: &str) -> bool {
    AFFIRMATIVE.contains(&normalized(input).as_str())
}

/// Whether the input asks for a full restart, whatever stage the dialogue is in.
pub fn is_reset_command(input: &str) -> bool {
    RESET_WORDS.contains(&normalized(input).as_str())
}

/// Reads a question count, clamped to the supported range. Non-numeric input yields 1.
pub fn parse_question_count(input: &str) -> usize {
    read_question_count(input).unwrap_or(1)
}

/// The user's reply at the next-action prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextActionChoice {
    Exit,
    NewTopic,
    /// A related topic picked by its 1-based number.
    Related(String),
    Unrecognized,
}

pub fn parse_next_action(input: &str, related_topics: &[String]) -> NextActionChoice {
    let choice = normalized(input);
    if EXIT_WORDS.contains(&choice.as_str()) {
        return NextActionChoice::Exit;
    }
    if NEW_TOPIC_WORDS.contains(&choice.as_str()) {
        return NextActionChoice::NewTopic;
    }
    match choice.parse::<usize>() {
        Ok(n) if (1..=related_topics.len()).contains(&n) => {
            NextActionChoice::Related(related_topics[n - 1].clone())
        }
        _ => NextActionChoice::Unrecognized,
    }
}

/// Extracts a list of strings from the first `[` to the last `]` of `text`.
///
/// Non-string elements are kept in their JSON form. Returns `None` when there is no
/// bracketed span or it does not parse as a JSON array.
pub fn extract_string_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let items: Vec<Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

/// Quiz questions from a model reply; falls back to the raw reply as one question.
pub fn parse_quiz_questions(raw: &str) -> Vec<String> {
    match extract_string_array(raw) {
        Some(questions) if !questions.is_empty() => questions,
        _ => vec![raw.to_string()],
    }
}

/// Up to three related topics from a model reply; falls back to fixed placeholders.
pub fn parse_related_topics(raw: &str) -> Vec<String> {
    match extract_string_array(raw) {
        Some(topics) if !topics.is_empty() => topics.into_iter().take(3).collect(),
        _ => FALLBACK_RELATED_TOPICS.iter().map(|t| t.to_string()).collect(),
    }
}

/// Finds the verdict on the grader's `Grade:` line, tolerating markdown emphasis.
pub fn parse_grade(raw: &str) -> Grade {
    for line in raw.lines() {
        let line = line.trim().trim_start_matches(['#', '-', '*', ' ']).to_lowercase();
        let line = line.replace('*', "");
        if let Some(verdict) = line.strip_prefix("grade:") {
            let verdict = verdict.trim();
            if verdict.starts_with("pass") {
                return Grade::Pass;
            }
            if verdict.starts_with("fail") {
                return Grade::Fail;
            }
        }
    }
    Grade::Ungraded
}
