//! HealthBot API Library Crate
//!
//! This library contains all the logic for the HealthBot web service: the
//! application state, the in-memory session registry, API handlers, WebSocket
//! sessions, and routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
