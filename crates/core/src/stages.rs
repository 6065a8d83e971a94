//! Stage Handlers
//!
//! One function per dialogue stage. Each takes the session state by value, plus the
//! user's message when the stage consumes one, and returns the next state together
//! with an optional reply. Only the completion-backed stages can fail, and only
//! when the completion port itself fails; every other irregularity resolves to a
//! documented default.

use crate::{
    InputMode,
    error::PortError,
    llm_client::LLMClient,
    parsing::{self, NextActionChoice},
    prompts::{PromptKey, Prompts},
    search::SearchService,
    session_state::{Level, NextAction, QuizRecord, SessionSettings, SessionState},
};
use tracing::{debug, info, warn};

pub const TOPIC_PROMPT: &str =
    "What health topic or medical condition would you like to learn about today?";
pub const QUIZ_PROMPT: &str =
    "Would you like to take a quick quiz to test your understanding? (yes/no)";
pub const QUESTION_COUNT_PROMPT: &str = "How many questions would you like? (1-5)";
pub const NEXT_QUESTION_PROMPT: &str = "Ready for the next question? (yes/no)";
pub const FAREWELL: &str = "Thank you for using HealthBot! Take care and stay healthy!";

const NEXT_ACTION_MENU: &str = "Would you like to:\n\
1. Learn about one of these related topics (enter the number)\n\
2. Learn about a new health topic (enter 'new')\n\
3. Exit (enter 'exit')";
const NEXT_ACTION_SHORT: &str =
    "Would you like to learn about a new health topic (enter 'new') or exit (enter 'exit')?";

/// Everything a stage may call out to.
pub struct StageContext<'a> {
    pub llm: &'a dyn LLMClient,
    pub search: &'a dyn SearchService,
    pub prompts: &'a Prompts,
    /// The latest settings supplied by the presentation layer.
    pub settings: &'a SessionSettings,
}

impl StageContext<'_> {
    async fn complete(&self, key: PromptKey, vars: &[(&str, &str)]) -> Result<String, PortError> {
        let system_prompt = self.prompts.template(PromptKey::SystemPrompt);
        let user_prompt = self.prompts.render(key, vars);
        self.llm.complete(system_prompt, &user_prompt).await
    }
}

/// A message produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message: String,
    pub input_mode: InputMode,
}

impl Reply {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            input_mode: InputMode::FreeText,
        }
    }

    pub fn yes_no(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            input_mode: InputMode::YesNo,
        }
    }
}

/// The result of running one stage.
#[derive(Debug)]
pub struct Transition {
    pub state: SessionState,
    pub reply: Option<Reply>,
}

impl Transition {
    pub fn silent(state: SessionState) -> Self {
        Self { state, reply: None }
    }

    pub fn reply(state: SessionState, reply: Reply) -> Self {
        Self {
            state,
            reply: Some(reply),
        }
    }
}

// --- Topic intake and information gathering ---

/// Starts a topic-cycle.
///
/// With a restart pending it resets the state (keeping the transcript), applies
/// the latest settings and keeps a pre-selected related topic. Otherwise it takes
/// the user's message as the topic; blank input leaves the state untouched.
pub fn intake_topic(
    state: SessionState,
    input: Option<&str>,
    settings: &SessionSettings,
) -> Transition {
    if state.next_action.is_some() {
        let seeded = match state.next_action {
            Some(NextAction::ContinueRelated) => state.topic.clone(),
            _ => None,
        };
        let mut fresh = state.reset(true);
        fresh.apply_settings(
            settings.difficulty,
            settings.detail_level,
            settings.question_count,
        );
        return match seeded {
            Some(topic) => {
                info!(topic = %topic, "Starting topic cycle from related topic");
                let intro = format!("Here's information about {topic}:");
                fresh.topic = Some(topic);
                Transition::reply(fresh, Reply::text(intro))
            }
            None => Transition::silent(fresh),
        };
    }

    let Some(topic) = input.map(str::trim).filter(|t| !t.is_empty()) else {
        return Transition::silent(state);
    };
    let mut state = state;
    state.apply_settings(
        settings.difficulty,
        settings.detail_level,
        settings.question_count,
    );
    state.topic = Some(topic.to_string());
    info!(topic = %topic, "Starting topic cycle");
    Transition::silent(state)
}

/// The search query for a topic at a given level of detail.
pub fn search_query(topic: &str, detail_level: Level) -> String {
    match detail_level {
        Level::Easy => format!("{topic} simple explanation for patients"),
        Level::Hard => format!("{topic} detailed medical information"),
        Level::Medium => format!("{topic} patient information"),
    }
}

/// Runs the web search. Failures degrade to an empty snippet list.
pub async fn fetch_information(mut state: SessionState, ctx: &StageContext<'_>) -> Transition {
    let topic = state.topic.clone().unwrap_or_default();
    let query = search_query(&topic, state.detail_level);

    let snippets = match ctx.search.search(&query).await {
        Ok(snippets) => {
            if snippets.is_empty() {
                warn!(query = %query, "Search returned no results; summarizing without sources");
            }
            snippets
        }
        Err(e) => {
            warn!(query = %query, error = %e, "Search failed; summarizing without sources");
            Vec::new()
        }
    };
    state.search_snippets = Some(snippets);
    Transition::silent(state)
}

fn paragraphs_for(detail_level: Level) -> &'static str {
    match detail_level {
        Level::Easy => "2-3",
        Level::Medium => "3-4",
        Level::Hard => "4-5",
    }
}

fn render_snippets(snippets: &[String]) -> String {
    if snippets.is_empty() {
        return "No search results were available.".to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(i, snippet)| format!("### Source {}\n{}", i + 1, snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Asks the completion port for a patient-friendly summary.
pub async fn summarize(
    mut state: SessionState,
    ctx: &StageContext<'_>,
) -> Result<Transition, PortError> {
    let topic = state.topic.clone().unwrap_or_default();
    let detail_level = state.detail_level.to_string();
    let snippets = render_snippets(state.search_snippets.as_deref().unwrap_or_default());

    let summary = ctx
        .complete(
            PromptKey::Summarize,
            &[
                ("topic", topic.as_str()),
                ("detail_level", detail_level.as_str()),
                ("paragraphs", paragraphs_for(state.detail_level)),
                ("snippets", snippets.as_str()),
            ],
        )
        .await?;

    let message = summary.trim().to_string();
    state.summary_text = Some(summary);
    Ok(Transition::reply(state, Reply::text(message)))
}

// --- Quiz ---

pub fn ask_quiz_readiness(mut state: SessionState, input: &str) -> Transition {
    let wanted = parsing::is_affirmative(input);
    info!(quiz_wanted = wanted, "Quiz readiness answered");
    state.quiz_wanted = Some(wanted);
    Transition::silent(state)
}

pub fn ask_question_count(mut state: SessionState, input: &str) -> Transition {
    state.requested_question_count = parsing::parse_question_count(input);
    state.question_count_chosen = true;
    Transition::silent(state)
}

/// Generates the quiz. Malformed output becomes a single question holding the raw reply.
pub async fn generate_quiz_questions(
    mut state: SessionState,
    ctx: &StageContext<'_>,
) -> Result<Transition, PortError> {
    let topic = state.topic.clone().unwrap_or_default();
    let summary = state.summary_text.clone().unwrap_or_default();
    let difficulty = state.difficulty.to_string();
    let count = state.requested_question_count.to_string();

    let raw = ctx
        .complete(
            PromptKey::GenerateQuiz,
            &[
                ("topic", topic.as_str()),
                ("difficulty", difficulty.as_str()),
                ("question_count", count.as_str()),
                ("summary", summary.as_str()),
            ],
        )
        .await?;

    let mut questions = parsing::parse_quiz_questions(&raw);
    questions.truncate(state.requested_question_count);
    if questions.len() < state.requested_question_count {
        warn!(
            requested = state.requested_question_count,
            received = questions.len(),
            "Fewer quiz questions than requested"
        );
        state.requested_question_count = questions.len();
    }
    debug!(questions = questions.len(), "Quiz generated");

    state.current_question_index = 0;
    state.quiz_questions = Some(questions);
    Ok(Transition::silent(state))
}

/// Renders the current question, or nothing when the index is out of range.
pub fn present_question(state: &SessionState) -> Option<Reply> {
    state.current_question().map(|question| {
        Reply::text(format!(
            "Question {}: {}",
            state.current_question_index + 1,
            question
        ))
    })
}

pub fn collect_answer(mut state: SessionState, input: &str) -> Transition {
    state.pending_answer = Some(input.to_string());
    Transition::silent(state)
}

pub async fn grade_answer(
    mut state: SessionState,
    ctx: &StageContext<'_>,
) -> Result<Transition, PortError> {
    let question = state.current_question().unwrap_or_default().to_string();
    let answer = state.pending_answer.clone().unwrap_or_default();
    let summary = state.summary_text.clone().unwrap_or_default();

    let raw = ctx
        .complete(
            PromptKey::GradeAnswer,
            &[
                ("question", question.as_str()),
                ("answer", answer.as_str()),
                ("summary", summary.as_str()),
            ],
        )
        .await?;

    let grade = parsing::parse_grade(&raw);
    info!(
        question_index = state.current_question_index,
        grade = ?grade,
        "Answer graded"
    );
    state.quiz_records.push(QuizRecord {
        question,
        answer,
        grade,
        feedback: raw.trim().to_string(),
    });
    state.pending_answer = None;
    Ok(Transition::silent(state))
}

/// Moves to the next question, or closes the quiz with an aggregated results message.
pub fn advance_or_summarize_quiz(
    mut state: SessionState,
    settings: &SessionSettings,
) -> Transition {
    let current_graded = state.quiz_records.len() > state.current_question_index;
    if current_graded && state.current_question_index + 1 < state.requested_question_count {
        state.current_question_index += 1;
        state.pending_answer = None;
        state.awaiting_next_question = settings.pause_between_questions;
        return Transition::silent(state);
    }

    let results = render_quiz_results(&state);
    state.quiz_results = Some(results.clone());
    Transition::reply(state, Reply::text(results))
}

fn render_quiz_results(state: &SessionState) -> String {
    let mut text = String::from("Quiz Results:\n\n");
    for (i, record) in state.quiz_records.iter().enumerate() {
        text.push_str(&format!(
            "Question {}: {}\n{}\n\n",
            i + 1,
            record.question,
            record.feedback
        ));
    }

    let answered = state.quiz_records.len();
    let passed = state
        .quiz_records
        .iter()
        .filter(|r| r.grade == crate::session_state::Grade::Pass)
        .count();
    text.push_str(&format!("Score: {passed}/{answered} passed\n"));

    let total = state.requested_question_count;
    if answered >= total {
        text.push_str(&format!(
            "You've completed all {total} questions! Thank you for testing your knowledge."
        ));
    } else {
        text.push_str(&format!("You answered {answered} of {total} questions."));
    }
    text
}

/// Continues the quiz on an affirmative reply; anything else ends it early.
pub fn confirm_next_question(mut state: SessionState, input: &str) -> Transition {
    state.awaiting_next_question = false;
    if !parsing::is_affirmative(input) {
        info!(
            answered = state.quiz_records.len(),
            "Skipping remaining quiz questions"
        );
        state.current_question_index = state.requested_question_count;
    }
    Transition::silent(state)
}

// --- Wrap-up ---

pub async fn suggest_related_topics(
    mut state: SessionState,
    ctx: &StageContext<'_>,
) -> Result<Transition, PortError> {
    let topic = state.topic.clone().unwrap_or_default();
    let summary = state.summary_text.clone().unwrap_or_default();

    let raw = ctx
        .complete(
            PromptKey::RelatedTopics,
            &[("topic", topic.as_str()), ("summary", summary.as_str())],
        )
        .await?;
    let topics = parsing::parse_related_topics(&raw);

    let mut message = String::from("You might also be interested in these related topics:");
    for (i, related) in topics.iter().enumerate() {
        message.push_str(&format!("\n{}. {}", i + 1, related));
    }
    state.related_topics = Some(topics);
    Ok(Transition::reply(state, Reply::text(message)))
}

pub fn ask_next_action(mut state: SessionState, input: &str) -> Transition {
    let related = state.related_topics.clone().unwrap_or_default();
    match parsing::parse_next_action(input, &related) {
        NextActionChoice::Exit => {
            state.next_action = Some(NextAction::Exit);
        }
        NextActionChoice::NewTopic => {
            state.next_action = Some(NextAction::NewTopic);
            state.topic = None;
        }
        NextActionChoice::Related(topic) => {
            state.next_action = Some(NextAction::ContinueRelated);
            state.topic = Some(topic);
        }
        NextActionChoice::Unrecognized => {
            warn!(input = %input, "Unrecognized next action; starting a new topic");
            state.next_action = Some(NextAction::NewTopic);
            state.topic = None;
        }
    }
    Transition::silent(state)
}

pub fn end_conversation(state: SessionState) -> Transition {
    Transition::reply(state, Reply::text(FAREWELL))
}

/// The prompt shown while the dialogue waits at `stage`.
pub fn prompt_for(stage: crate::router::Stage, state: &SessionState) -> Option<Reply> {
    use crate::router::Stage;
    match stage {
        Stage::IntakeTopic => Some(Reply::text(TOPIC_PROMPT)),
        Stage::AskQuizReadiness => Some(Reply::yes_no(QUIZ_PROMPT)),
        Stage::AskQuestionCount => Some(Reply::text(QUESTION_COUNT_PROMPT)),
        Stage::PresentQuestion => present_question(state),
        Stage::ConfirmNextQuestion => Some(Reply::yes_no(NEXT_QUESTION_PROMPT)),
        Stage::AskNextAction => {
            let has_related = state
                .related_topics
                .as_ref()
                .is_some_and(|topics| !topics.is_empty());
            Some(Reply::text(if has_related {
                NEXT_ACTION_MENU
            } else {
                NEXT_ACTION_SHORT
            }))
        }
        _ => None,
    }
}
