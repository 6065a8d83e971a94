//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CreateSessionPayload, ErrorResponse, OutputBody, SessionCreated, SessionSnapshot,
        SessionSummary, SettingsPayload, TurnPayload, TurnResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::post_turn,
        handlers::update_settings,
        handlers::clear_session,
        handlers::delete_session,
    ),
    components(
        schemas(
            CreateSessionPayload,
            SettingsPayload,
            TurnPayload,
            OutputBody,
            SessionCreated,
            TurnResponse,
            SessionSummary,
            SessionSnapshot,
            ErrorResponse
        )
    ),
    tags(
        (name = "HealthBot API", description = "Conversations with the HealthBot patient-education agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/{id}/turns", post(handlers::post_turn))
        .route("/sessions/{id}/settings", put(handlers::update_settings))
        .route("/sessions/{id}/clear", post(handlers::clear_session))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(cors)
}
