//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session registry and
//! the ports every new session is built from.

use crate::{config::Config, registry::SessionRegistry};
use healthbot_core::{
    driver::SessionDriver, llm_client::LLMClient, prompts::Prompts, search::SearchService,
    session_state::SessionSettings,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub llm_client: Arc<dyn LLMClient>,
    pub search: Arc<dyn SearchService>,
    pub prompts: Arc<Prompts>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds a driver for a new session over the shared ports.
    pub fn new_driver(&self, settings: SessionSettings) -> SessionDriver {
        SessionDriver::new(
            self.llm_client.clone(),
            self.search.clone(),
            self.prompts.clone(),
            settings,
        )
    }
}
