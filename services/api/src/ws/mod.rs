//! WebSocket Sessions
//!
//! A browser-facing alternative to the REST turn endpoint. One socket owns one
//! conversation for its whole lifetime:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to termination.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
