//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::{OutputBody, SettingsPayload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a conversation. This must be the first message.
    Init {
        /// Overrides for the server's default session settings.
        #[serde(default)]
        settings: Option<SettingsPayload>,
    },
    /// A text message from the user to the agent.
    UserMessage { text: String },
    /// Changes the settings used from the next topic onward.
    UpdateSettings { settings: SettingsPayload },
    /// Restarts the conversation with an empty transcript.
    Clear,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session exists and carries the opening prompt.
    Initialized { session_id: Uuid, output: OutputBody },
    /// Everything the agent said in reply to one user message.
    AgentOutput { output: OutputBody },
    /// Reports an error. The session stays open unless `ended` follows.
    Error { message: String },
    /// The conversation is over; the server closes the socket after this.
    Ended,
}
