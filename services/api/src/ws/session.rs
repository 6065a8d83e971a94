//! Manages the WebSocket connection lifecycle for one HealthBot conversation.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{registry::SharedSession, state::AppState};
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use healthbot_core::driver::TurnError;
use std::sync::Arc;
use tracing::{Instrument, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// The first message must be `init`. The conversation then runs until the user
/// exits or the client disconnects, and is removed from the registry either way.
#[instrument(name = "ws_session", skip_all, fields(connection_id, session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection. Awaiting initialization...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<ClientMessage>(&text)
            .map_err(|e| anyhow!("Invalid init message: {e}")),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        Some(Err(e)) => Err(anyhow!("Error receiving init message: {e}")),
        None => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };

    let settings = match init {
        Ok(ClientMessage::Init { settings }) => settings
            .unwrap_or_default()
            .merge_into(state.config.default_settings),
        Ok(_) => {
            let _ = send_error(&mut socket_tx, "First message must be `init`").await;
            return;
        }
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_error(&mut socket_tx, &e.to_string()).await;
            return;
        }
    };

    let driver = state.new_driver(settings);
    let output = driver.initial_output();
    let (session_id, entry) = state.registry.insert(driver).await;
    tracing::Span::current().record("session_id", tracing::field::display(session_id));

    if send_msg(
        &mut socket_tx,
        ServerMessage::Initialized {
            session_id,
            output: output.into(),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        state.registry.remove(&session_id).await;
        return;
    }

    let session_span = tracing::info_span!("conversation", %session_id);
    if let Err(e) = run_conversation(&mut socket_tx, &mut socket_rx, &entry)
        .instrument(session_span)
        .await
    {
        error!(error = ?e, "Conversation terminated with error.");
    }

    state.registry.remove(&session_id).await;
    let _ = socket_tx.close().await;
    info!("WebSocket connection closed and session discarded.");
}

/// Handles client messages until the conversation ends or the client goes away.
async fn run_conversation(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    socket_rx: &mut SplitStream<WebSocket>,
    entry: &SharedSession,
) -> Result<()> {
    while let Some(msg_result) = socket_rx.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!("Ignoring binary message.");
                continue;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };

        let msg = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                send_error(socket_tx, &format!("Invalid message: {e}")).await?;
                continue;
            }
        };

        let mut driver = entry.driver.lock().await;
        match msg {
            ClientMessage::UserMessage { text } => match driver.handle_turn(&text).await {
                Ok(output) => {
                    send_msg(
                        socket_tx,
                        ServerMessage::AgentOutput {
                            output: output.into(),
                        },
                    )
                    .await?;
                    if driver.is_finished() {
                        send_msg(socket_tx, ServerMessage::Ended).await?;
                        break;
                    }
                }
                Err(TurnError::SessionEnded) => {
                    send_msg(socket_tx, ServerMessage::Ended).await?;
                    break;
                }
                Err(e @ TurnError::Capability { .. }) => {
                    warn!(error = %e, "Turn failed; waiting for the client to retry");
                    send_error(
                        socket_tx,
                        &format!("{e}. Send another message to retry."),
                    )
                    .await?;
                }
                Err(e) => {
                    error!(error = %e, "Turn failed");
                    send_error(socket_tx, "An internal server error occurred.").await?;
                }
            },
            ClientMessage::UpdateSettings { settings } => {
                let merged = settings.merge_into(*driver.settings());
                driver.update_settings(merged);
            }
            ClientMessage::Clear => {
                let output = driver.clear();
                send_msg(
                    socket_tx,
                    ServerMessage::AgentOutput {
                        output: output.into(),
                    },
                )
                .await?;
            }
            ClientMessage::Init { .. } => {
                warn!("Ignoring repeated init message.");
                send_error(socket_tx, "Session is already initialized").await?;
            }
        }
    }
    Ok(())
}

async fn send_error(socket_tx: &mut SplitSink<WebSocket, Message>, message: &str) -> Result<()> {
    send_msg(
        socket_tx,
        ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
