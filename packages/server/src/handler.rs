//! WebSocket connection handling: authentication handshake, per-connection
//! frame loop, and the small HTTP status surface.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

use cinesync_shared::time::utc_now_rfc3339;

use crate::{
    protocol::{
        CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, CLOSE_UNSUPPORTED_DATA, ClientMessage,
        ServerMessage, UserId, auth_token_from_value, parse_room_id,
    },
    registry::ConnectionSender,
    rooms::{EnterError, VideoOp},
    state::AppState,
};

/// Time a client has to present a token after connecting without one.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket endpoint. Tries header-embedded bearer authentication first;
/// connections without a valid header token go through the in-band flow
/// after the upgrade completes.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let header_user = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| state.verifier.verify(token));

    ws.on_upgrade(move |socket| handle_connection(socket, state, header_user))
}

async fn handle_connection(
    mut socket: WebSocket,
    state: Arc<AppState>,
    header_user: Option<UserId>,
) {
    let user_id = match header_user {
        Some(user_id) => user_id,
        None => match inband_auth(&mut socket, &state).await {
            Some(user_id) => user_id,
            None => return,
        },
    };

    handle_authenticated(socket, state, user_id).await;
}

/// Outcome of waiting for the in-band auth frame.
enum AuthFrame {
    Text(String),
    NotText,
    Gone,
}

/// In-band authentication: announce `auth_required`, then give the client
/// [`AUTH_TIMEOUT`] to send a token. Every failure path closes the
/// connection; only a verified token returns a user id.
async fn inband_auth(socket: &mut WebSocket, state: &AppState) -> Option<UserId> {
    let required = ServerMessage::AuthRequired {
        message: "authentication token required".to_string(),
        timeout: state.auth_timeout.as_secs(),
    };
    if send_json(socket, &required).await.is_err() {
        close_with(socket, CLOSE_INTERNAL_ERROR, "internal error").await;
        return None;
    }

    let frame = timeout(state.auth_timeout, async {
        loop {
            match socket.recv().await {
                Some(Ok(Message::Text(text))) => break AuthFrame::Text(text.to_string()),
                Some(Ok(Message::Binary(_))) => break AuthFrame::NotText,
                // Ping/pong may arrive before the auth frame; keep waiting.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break AuthFrame::Gone,
                Some(Err(_)) => break AuthFrame::Gone,
            }
        }
    })
    .await;

    let text = match frame {
        Ok(AuthFrame::Text(text)) => text,
        Ok(AuthFrame::NotText) => {
            let reply = ServerMessage::AuthError {
                message: "expected a JSON text frame".to_string(),
            };
            let _ = send_json(socket, &reply).await;
            close_with(socket, CLOSE_UNSUPPORTED_DATA, "unsupported data").await;
            return None;
        }
        Ok(AuthFrame::Gone) => {
            tracing::info!("Client disconnected during authentication");
            return None;
        }
        Err(_) => {
            let reply = ServerMessage::AuthError {
                message: format!(
                    "authentication timed out after {}s, closing connection",
                    state.auth_timeout.as_secs()
                ),
            };
            let _ = send_json(socket, &reply).await;
            close_with(socket, CLOSE_POLICY_VIOLATION, "auth timeout").await;
            tracing::warn!("WebSocket authentication timed out");
            return None;
        }
    };

    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => {
            let reply = ServerMessage::AuthError {
                message: "invalid JSON".to_string(),
            };
            let _ = send_json(socket, &reply).await;
            close_with(socket, CLOSE_UNSUPPORTED_DATA, "malformed JSON").await;
            return None;
        }
    };

    let Some(token) = auth_token_from_value(&value) else {
        let reply = ServerMessage::AuthError {
            message: "missing authentication token".to_string(),
        };
        let _ = send_json(socket, &reply).await;
        close_with(socket, CLOSE_POLICY_VIOLATION, "missing token").await;
        return None;
    };

    let Some(user_id) = state.verifier.verify(&token) else {
        let reply = ServerMessage::AuthError {
            message: "invalid authentication token".to_string(),
        };
        let _ = send_json(socket, &reply).await;
        close_with(socket, CLOSE_POLICY_VIOLATION, "invalid token").await;
        return None;
    };

    let reply = ServerMessage::AuthSuccess {
        message: "authentication successful".to_string(),
        user_id,
    };
    if send_json(socket, &reply).await.is_err() {
        return None;
    }
    Some(user_id)
}

/// Authenticated connection: register the session, start the writer task,
/// run the frame loop, and tear everything down when either side ends.
async fn handle_authenticated(socket: WebSocket, state: Arc<AppState>, user_id: UserId) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    state.hub.registry().register(user_id, tx.clone()).await;

    let established = ServerMessage::ConnectionEstablished {
        user_id,
        message: "WebSocket connection established".to_string(),
    };
    let _ = tx.send(established);

    // Writer task: owns the sink, serializes queued messages in order.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let loop_state = state.clone();
    let loop_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("WebSocket error for user {}: {}", user_id, e);
                    break;
                }
            };
            match frame {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            process_message(&loop_state, user_id, &loop_tx, message).await;
                        }
                        Err(_) => {
                            let _ = loop_tx
                                .send(ServerMessage::error("message must be valid JSON"));
                        }
                    }
                }
                Message::Binary(_) => {
                    let _ = loop_tx.send(ServerMessage::error("binary frames are not supported"));
                }
                // Transport-level ping/pong is answered by the WebSocket layer.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => {
                    tracing::info!("User {} requested close", user_id);
                    break;
                }
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    state.hub.disconnect(user_id, &tx).await;
}

/// Dispatch one decoded frame. Domain errors turn into typed replies and
/// never end the loop.
async fn process_message(
    state: &Arc<AppState>,
    user_id: UserId,
    tx: &ConnectionSender,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::EnterRoom { room_id } => {
            handle_enter_room(state, user_id, tx, &room_id).await;
        }
        ClientMessage::LeaveRoom { room_id } => {
            handle_leave_room(state, user_id, tx, &room_id).await;
        }
        ClientMessage::SetVedioUrl {
            room_id,
            url,
            duration,
        } => {
            let op = VideoOp::SetUrl {
                url: url.clone(),
                duration,
            };
            if state.hub.rooms().apply_video_op(room_id, user_id, &op).await {
                let broadcast = ServerMessage::SetVedioUrl {
                    room_id,
                    sender_id: user_id,
                    url,
                    timestamp: utc_now_rfc3339(),
                };
                state
                    .hub
                    .broadcast_to_room(room_id, &broadcast, Some(user_id))
                    .await;
            }
        }
        ClientMessage::SetVedioStart { room_id, progress } => {
            let op = VideoOp::Play { progress };
            if state.hub.rooms().apply_video_op(room_id, user_id, &op).await {
                let broadcast = ServerMessage::SetVedioStart {
                    room_id,
                    sender_id: user_id,
                    progress,
                    timestamp: utc_now_rfc3339(),
                };
                state
                    .hub
                    .broadcast_to_room(room_id, &broadcast, Some(user_id))
                    .await;
            }
        }
        ClientMessage::SetVedioPause { room_id, progress } => {
            let op = VideoOp::Pause { progress };
            if state.hub.rooms().apply_video_op(room_id, user_id, &op).await {
                let broadcast = ServerMessage::SetVedioPause {
                    room_id,
                    sender_id: user_id,
                    progress,
                    timestamp: utc_now_rfc3339(),
                };
                state
                    .hub
                    .broadcast_to_room(room_id, &broadcast, Some(user_id))
                    .await;
            }
        }
        ClientMessage::SetVedioJump {
            room_id,
            video_time_offset,
            playing,
            timestamp,
        } => {
            let op = VideoOp::Seek {
                offset: video_time_offset,
                playing,
                client_timestamp: timestamp,
            };
            if state.hub.rooms().apply_video_op(room_id, user_id, &op).await {
                let broadcast = ServerMessage::SetVedioJump {
                    room_id,
                    sender_id: user_id,
                    video_time_offset,
                    playing,
                    timestamp,
                };
                state
                    .hub
                    .broadcast_to_room(room_id, &broadcast, Some(user_id))
                    .await;
            }
        }
        // `auth` outside the handshake is not a supported frame.
        ClientMessage::Auth { .. } | ClientMessage::Unsupported => {
            let _ = tx.send(ServerMessage::unsupported());
        }
    }
}

async fn handle_enter_room(
    state: &Arc<AppState>,
    user_id: UserId,
    tx: &ConnectionSender,
    raw_room_id: &Option<Value>,
) {
    let Some(room_id) = parse_room_id(raw_room_id) else {
        let _ = tx.send(ServerMessage::RoomEnterError {
            room_id: None,
            status: "invalid".to_string(),
            message: "missing or invalid room id".to_string(),
        });
        return;
    };

    match state.hub.rooms().enter(user_id, room_id).await {
        Ok(room_info) => {
            let _ = tx.send(ServerMessage::RoomEntered {
                room_id,
                status: "success".to_string(),
                room_info,
            });
        }
        Err(EnterError::RoomNotFound) => {
            let _ = tx.send(ServerMessage::RoomEnterError {
                room_id: Some(room_id),
                status: "failed".to_string(),
                message: "room not found".to_string(),
            });
        }
        Err(EnterError::NotAMember) => {
            let _ = tx.send(ServerMessage::RoomEnterError {
                room_id: Some(room_id),
                status: "failed".to_string(),
                message: "no permission to access this room".to_string(),
            });
        }
        Err(EnterError::Directory(e)) => {
            tracing::error!(
                "Error entering room {} for user {}: {}",
                room_id,
                user_id,
                e
            );
            let _ = tx.send(ServerMessage::RoomEnterError {
                room_id: Some(room_id),
                status: "error".to_string(),
                message: "failed to enter room".to_string(),
            });
        }
    }
}

async fn handle_leave_room(
    state: &Arc<AppState>,
    user_id: UserId,
    tx: &ConnectionSender,
    raw_room_id: &Option<Value>,
) {
    let Some(room_id) = parse_room_id(raw_room_id) else {
        let _ = tx.send(ServerMessage::RoomLeaveError {
            room_id: None,
            status: "invalid".to_string(),
            message: "missing or invalid room id".to_string(),
        });
        return;
    };

    if state.hub.rooms().current_room(user_id).await != Some(room_id) {
        let _ = tx.send(ServerMessage::RoomLeaveError {
            room_id: Some(room_id),
            status: "invalid".to_string(),
            message: "not currently in this room".to_string(),
        });
        return;
    }

    state.hub.rooms().leave(user_id, room_id).await;
    let _ = tx.send(ServerMessage::RoomLeft {
        room_id,
        status: "success".to_string(),
    });
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// WebSocket status endpoint
pub async fn ws_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "websocket_enabled": true,
        "online_users": state.hub.registry().online_count().await,
        "active_rooms": state.hub.rooms().active_rooms_count().await,
        "endpoint": "/ws",
    }))
}

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Hook for the account service: push a `receive_notification` nudge to a
/// connected user.
pub async fn notify_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<u64>,
) -> Json<Value> {
    let delivered = state.hub.notify_user(UserId(user_id)).await;
    Json(serde_json::json!({"delivered": delivered}))
}
