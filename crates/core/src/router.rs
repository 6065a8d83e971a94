//! Dialogue Router
//!
//! Maps a [`SessionState`] to the stage that must run next. The router holds no
//! state of its own, so the same session state always yields the same stage.

use crate::session_state::{NextAction, SessionState};
use serde::Serialize;
use std::fmt;

/// One step of the HealthBot dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntakeTopic,
    FetchInformation,
    Summarize,
    AskQuizReadiness,
    AskQuestionCount,
    GenerateQuizQuestions,
    /// Shows the current question; the user's reply is handled by `collect_answer`.
    PresentQuestion,
    GradeAnswer,
    AdvanceOrSummarizeQuiz,
    ConfirmNextQuestion,
    SuggestRelatedTopics,
    AskNextAction,
    EndConversation,
}

impl Stage {
    /// Whether the stage needs the user's next message before it can run.
    ///
    /// `IntakeTopic` runs on its own while a topic restart is pending, and waits for
    /// the user otherwise.
    pub fn awaits_input(self, state: &SessionState) -> bool {
        match self {
            Stage::IntakeTopic => state.next_action.is_none(),
            Stage::AskQuizReadiness
            | Stage::AskQuestionCount
            | Stage::PresentQuestion
            | Stage::ConfirmNextQuestion
            | Stage::AskNextAction => true,
            Stage::FetchInformation
            | Stage::Summarize
            | Stage::GenerateQuizQuestions
            | Stage::GradeAnswer
            | Stage::AdvanceOrSummarizeQuiz
            | Stage::SuggestRelatedTopics
            | Stage::EndConversation => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::EndConversation
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::IntakeTopic => "intake_topic",
            Stage::FetchInformation => "fetch_information",
            Stage::Summarize => "summarize",
            Stage::AskQuizReadiness => "ask_quiz_readiness",
            Stage::AskQuestionCount => "ask_question_count",
            Stage::GenerateQuizQuestions => "generate_quiz_questions",
            Stage::PresentQuestion => "present_question",
            Stage::GradeAnswer => "grade_answer",
            Stage::AdvanceOrSummarizeQuiz => "advance_or_summarize_quiz",
            Stage::ConfirmNextQuestion => "confirm_next_question",
            Stage::SuggestRelatedTopics => "suggest_related_topics",
            Stage::AskNextAction => "ask_next_action",
            Stage::EndConversation => "end_conversation",
        };
        f.write_str(name)
    }
}

/// Decides which stage runs next.
pub fn route(state: &SessionState) -> Stage {
    match state.next_action {
        Some(NextAction::Exit) => return Stage::EndConversation,
        Some(NextAction::NewTopic | NextAction::ContinueRelated) => return Stage::IntakeTopic,
        None => {}
    }

    if state.topic.is_none() {
        return Stage::IntakeTopic;
    }
    if state.search_snippets.is_none() {
        return Stage::FetchInformation;
    }
    if state.summary_text.is_none() {
        return Stage::Summarize;
    }

    match state.quiz_wanted {
        None => Stage::AskQuizReadiness,
        Some(false) => after_quiz(state),
        Some(true) => route_quiz(state),
    }
}

fn route_quiz(state: &SessionState) -> Stage {
    if !state.question_count_chosen {
        return Stage::AskQuestionCount;
    }
    if state.quiz_questions.is_none() {
        return Stage::GenerateQuizQuestions;
    }
    if state.quiz_results.is_some() {
        return after_quiz(state);
    }
    if state.pending_answer.is_some() {
        return Stage::GradeAnswer;
    }
    if state.quiz_records.len() > state.current_question_index {
        return Stage::AdvanceOrSummarizeQuiz;
    }
    if state.awaiting_next_question {
        return Stage::ConfirmNextQuestion;
    }
    if state.current_question_index < state.requested_question_count {
        return Stage::PresentQuestion;
    }
    // Quiz cut short: aggregate what was answered.
    Stage::AdvanceOrSummarizeQuiz
}

fn after_quiz(state: &SessionState) -> Stage {
    if state.related_topics.is_none() {
        Stage::SuggestRelatedTopics
    } else {
        Stage::AskNextAction
    }
}
