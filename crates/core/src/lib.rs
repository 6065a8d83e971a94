pub mod driver;
pub mod error;
pub mod llm_client;
pub mod parsing;
pub mod prompts;
pub mod router;
pub mod search;
pub mod session_state;
pub mod stages;

use serde::{Deserialize, Serialize};

/// How the presentation layer should collect the user's next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Any text.
    #[default]
    FreeText,
    /// A yes/no answer; a UI may offer two buttons instead of a text box.
    YesNo,
}

/// What the agent says at the end of a turn.
///
/// This is the only thing the core hands back to a presentation layer, which keeps
/// the dialogue logic independent of whether it is shown in a terminal, a web page,
/// or over a WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub message: String,
    pub input_mode: InputMode,
}
