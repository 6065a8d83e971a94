//! Main Entrypoint for the HealthBot API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the completion and search ports and the prompt templates.
//! 3. Constructing the Axum router.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use healthbot_api::{
    config::{Config, Provider},
    registry::SessionRegistry,
    router::create_router,
    state::AppState,
};
use healthbot_core::{
    llm_client::{LLMClient, LoggingLLMClient, OpenAICompatibleClient},
    prompts::Prompts,
    search::{CannedSearchService, SearchService, TavilySearchService},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn build_llm_client(config: &Config) -> anyhow::Result<Arc<dyn LLMClient>> {
    let openai_config = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is not set")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/")
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY is not set")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai")
        }
    };

    let inner = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));
    Ok(Arc::new(
        LoggingLLMClient::new(inner, config.chat_model.clone()).with_timeout(config.port_timeout),
    ))
}

fn build_search(config: &Config) -> anyhow::Result<Arc<dyn SearchService>> {
    match &config.tavily_api_key {
        Some(api_key) => Ok(Arc::new(
            TavilySearchService::new(api_key.clone(), config.port_timeout)
                .context("Failed to build search client")?,
        )),
        None => {
            warn!("TAVILY_API_KEY is not set; summaries will be written without search results.");
            Ok(Arc::new(CannedSearchService::default()))
        }
    }
}

fn load_prompts(config: &Config) -> anyhow::Result<Prompts> {
    if config.prompts_path.is_dir() {
        Prompts::load_dir(&config.prompts_path)
    } else {
        info!(
            path = %config.prompts_path.display(),
            "No prompts directory found; using built-in prompts."
        );
        Ok(Prompts::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let app_state = Arc::new(AppState {
        registry: SessionRegistry::new(),
        llm_client: build_llm_client(&config)?,
        search: build_search(&config)?,
        prompts: Arc::new(load_prompts(&config)?),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router ---
    let app = create_router(app_state);

    // --- 5. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
