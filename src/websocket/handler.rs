use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::WsMetrics;
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Longest accepted channel name
const MAX_CHANNEL_NAME_LEN: usize = 64;

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_start = std::time::Instant::now();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    // Register connection with limit checking
    let handle = match state.connection_manager.register(tx) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let error_msg = ServerMessage::error("CONNECTION_LIMIT", e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    WsMetrics::record_opened();

    // Announce the socket id before anything else can be queued
    let _ = handle
        .send(ServerMessage::ConnectionEstablished {
            socket_id: handle.socket_id(),
        })
        .await;

    tracing::info!(socket_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            // Pre-serialized messages avoid the serialization cost here
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Task for receiving messages from WebSocket
    let state_clone = state.clone();
    let handle_clone = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {
            tracing::debug!(socket_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(socket_id = %connection_id, "Receive task completed");
        }
    }

    state.connection_manager.unregister(connection_id).await;

    let duration = connection_start.elapsed();
    WsMetrics::record_closed(duration);

    tracing::info!(
        socket_id = %connection_id,
        duration_secs = duration.as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(socket_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[tracing::instrument(
    name = "ws.message",
    skip(state, handle),
    fields(socket_id = %handle.id, message_type = ?msg)
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, handle: &Arc<ConnectionHandle>) {
    match msg {
        ClientMessage::Subscribe { channels } => handle_subscribe(channels, state, handle).await,
        ClientMessage::Unsubscribe { channels } => {
            handle_unsubscribe(channels, state, handle).await
        }
        ClientMessage::Ping => {
            let _ = handle.send(ServerMessage::Pong).await;
        }
    }
}

async fn handle_subscribe(channels: Vec<String>, state: &AppState, handle: &Arc<ConnectionHandle>) {
    let mut subscribed = Vec::new();
    let mut errors = Vec::new();

    for channel in channels {
        if !is_valid_channel_name(&channel) {
            tracing::warn!(socket_id = %handle.id, channel = %channel, "Invalid channel name");
            errors.push(format!("Invalid channel name: {}", channel));
            continue;
        }

        match state
            .connection_manager
            .subscribe_to_channel(handle.id, &channel)
            .await
        {
            Ok(()) => subscribed.push(channel),
            Err(e) => {
                tracing::warn!(
                    socket_id = %handle.id,
                    channel = %channel,
                    error = %e,
                    "Failed to subscribe to channel"
                );
                errors.push(e.to_string());
            }
        }
    }

    if !subscribed.is_empty() {
        tracing::info!(socket_id = %handle.id, channels = ?subscribed, "Subscribed to channels");
        let _ = handle.send(ServerMessage::subscribed(subscribed)).await;
    }

    if !errors.is_empty() {
        let _ = handle
            .send(ServerMessage::error("SUBSCRIPTION_ERROR", errors.join("; ")))
            .await;
    }
}

async fn handle_unsubscribe(channels: Vec<String>, state: &AppState, handle: &Arc<ConnectionHandle>) {
    if channels.is_empty() {
        return;
    }

    for channel in &channels {
        state
            .connection_manager
            .unsubscribe_from_channel(handle.id, channel)
            .await;
    }

    tracing::info!(socket_id = %handle.id, channels = ?channels, "Unsubscribed from channels");
    let _ = handle.send(ServerMessage::unsubscribed(channels)).await;
}

/// Channel names are 1 to 64 characters of alphanumerics and `-_.:@`
pub fn is_valid_channel_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_CHANNEL_NAME_LEN {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
}
