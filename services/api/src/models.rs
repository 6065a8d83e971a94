//! API Models
//!
//! Request and response bodies for the REST API, with `utoipa` schemas for the
//! OpenAPI document. Core types are converted at this boundary so the core crate
//! stays free of HTTP concerns.

use chrono::{DateTime, Utc};
use healthbot_core::{
    AgentOutput, InputMode,
    session_state::{Level, SessionSettings},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Session settings as accepted over the wire. Missing fields take the server defaults.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Default, PartialEq)]
pub struct SettingsPayload {
    #[schema(value_type = Option<String>, example = "medium")]
    pub difficulty: Option<Level>,
    #[schema(value_type = Option<String>, example = "easy")]
    pub detail_level: Option<Level>,
    #[schema(example = 3)]
    pub question_count: Option<usize>,
    pub pause_between_questions: Option<bool>,
}

impl SettingsPayload {
    /// Fills the missing fields from `base`.
    pub fn merge_into(&self, base: SessionSettings) -> SessionSettings {
        SessionSettings {
            difficulty: self.difficulty.unwrap_or(base.difficulty),
            detail_level: self.detail_level.unwrap_or(base.detail_level),
            question_count: self.question_count.unwrap_or(base.question_count),
            pause_between_questions: self
                .pause_between_questions
                .unwrap_or(base.pause_between_questions),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateSessionPayload {
    #[serde(default)]
    pub settings: Option<SettingsPayload>,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct TurnPayload {
    #[schema(example = "diabetes")]
    pub text: String,
}

/// One agent message, as shown to the user.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct OutputBody {
    pub message: String,
    /// `free_text` or `yes_no`.
    #[schema(value_type = String, example = "free_text")]
    pub input_mode: InputMode,
}

impl From<AgentOutput> for OutputBody {
    fn from(output: AgentOutput) -> Self {
        Self {
            message: output.message,
            input_mode: output.input_mode,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SessionCreated {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub output: OutputBody,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TurnResponse {
    pub output: OutputBody,
    pub finished: bool,
}

/// A listing entry for `GET /sessions`.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub topic: Option<String>,
    #[schema(example = "ask_quiz_readiness")]
    pub stage: String,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
}

/// Full view of one session, including its state record.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SessionSnapshot {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub stage: String,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub settings: serde_json::Value,
    #[schema(value_type = Object)]
    pub state: serde_json::Value,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}
