//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for session management
//! and dialogue turns. It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use healthbot_core::driver::TurnError;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    models::{
        CreateSessionPayload, ErrorResponse, OutputBody, SessionCreated, SessionSnapshot,
        SessionSummary, SettingsPayload, TurnPayload, TurnResponse,
    },
    registry::SharedSession,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Gone(String),
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Gone(message) => {
                (StatusCode::GONE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::BadGateway(message) => {
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Maps a failed turn onto the HTTP error it is reported as.
pub fn turn_error(err: TurnError) -> ApiError {
    match err {
        TurnError::Capability { stage, source } => {
            warn!(stage = %stage, error = %source, "Turn failed on a capability call");
            ApiError::BadGateway(format!(
                "The assistant could not complete '{stage}' ({source}). Send another message to retry."
            ))
        }
        TurnError::SessionEnded => ApiError::Gone("This conversation has ended.".to_string()),
        stalled @ TurnError::Stalled(_) => ApiError::InternalServerError(stalled.into()),
    }
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, ApiError> {
    state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

/// Start a new HealthBot conversation.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionCreated),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = payload
        .settings
        .unwrap_or_default()
        .merge_into(state.config.default_settings);
    let driver = state.new_driver(settings);
    let output = driver.initial_output();
    let (session_id, _) = state.registry.insert(driver).await;

    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id,
            output: output.into(),
        }),
    ))
}

/// List all live sessions.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    let mut summaries = Vec::new();
    for (id, entry) in state.registry.list().await {
        let driver = entry.driver.lock().await;
        summaries.push(SessionSummary {
            id,
            topic: driver.state().topic.clone(),
            stage: driver.current_stage().to_string(),
            finished: driver.is_finished(),
            created_at: entry.created_at,
        });
    }
    Json(summaries)
}

/// Get a specific session, including its full state record.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionSnapshot),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let entry = find_session(&state, id).await?;
    let driver = entry.driver.lock().await;

    Ok(Json(SessionSnapshot {
        id,
        stage: driver.current_stage().to_string(),
        finished: driver.is_finished(),
        created_at: entry.created_at,
        settings: serde_json::to_value(driver.settings())?,
        state: serde_json::to_value(driver.state())?,
    }))
}

/// Send one user message and receive the agent's reply.
#[utoipa::path(
    post,
    path = "/sessions/{id}/turns",
    request_body = TurnPayload,
    responses(
        (status = 200, description = "Agent reply. A finished session is discarded after this reply.", body = TurnResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 410, description = "Conversation already ended", body = ErrorResponse),
        (status = 502, description = "Completion service failed; retry with another message", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TurnPayload>,
) -> Result<Json<TurnResponse>, ApiError> {
    let entry = find_session(&state, id).await?;
    let (output, finished) = {
        let mut driver = entry.driver.lock().await;
        let output = driver
            .handle_turn(&payload.text)
            .instrument(info_span!("turn", session_id = %id))
            .await
            .map_err(turn_error)?;
        (output, driver.is_finished())
    };

    if finished {
        state.registry.remove(&id).await;
        info!(session_id = %id, "Conversation ended; session discarded");
    }

    Ok(Json(TurnResponse {
        output: output.into(),
        finished,
    }))
}

/// Change the settings used from the next topic onward.
#[utoipa::path(
    put,
    path = "/sessions/{id}/settings",
    request_body = SettingsPayload,
    responses(
        (status = 204, description = "Settings updated"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SettingsPayload>,
) -> Result<StatusCode, ApiError> {
    let entry = find_session(&state, id).await?;
    let mut driver = entry.driver.lock().await;
    let settings = payload.merge_into(*driver.settings());
    driver.update_settings(settings);
    Ok(StatusCode::NO_CONTENT)
}

/// Clear the conversation, including its transcript.
#[utoipa::path(
    post,
    path = "/sessions/{id}/clear",
    responses(
        (status = 200, description = "Conversation restarted", body = OutputBody),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutputBody>, ApiError> {
    let entry = find_session(&state, id).await?;
    let output = entry.driver.lock().await.clear();
    Ok(Json(output.into()))
}

/// Discard a session.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.registry.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Session with id '{}' not found",
            id
        )))
    }
}
