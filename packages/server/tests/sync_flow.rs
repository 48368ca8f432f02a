//! Integration tests driving the full WebSocket surface: both auth paths,
//! room entry, playback broadcast fan-out, and the HTTP status endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use cinesync_server::auth::{JwtTokenVerifier, issue_token};
use cinesync_server::directory::InMemoryRoomDirectory;
use cinesync_server::hub::RealtimeHub;
use cinesync_server::protocol::{RoomId, UserId};
use cinesync_server::runner::build_router;
use cinesync_server::state::AppState;

const SECRET: &[u8] = b"integration-secret";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the coordinator on an ephemeral port with rooms 42 (users 1, 2)
/// and 7 (user 3) seeded. Returns the bound address.
async fn start_test_server() -> SocketAddr {
    start_test_server_with_auth_timeout(Duration::from_secs(30)).await
}

async fn start_test_server_with_auth_timeout(auth_timeout: Duration) -> SocketAddr {
    let directory = InMemoryRoomDirectory::new();
    directory.seed_room(RoomId(42), [UserId(1), UserId(2)]).await;
    directory.seed_room(RoomId(7), [UserId(3)]).await;

    let hub = RealtimeHub::new(Arc::new(directory));
    let state = Arc::new(
        AppState::new(hub, Arc::new(JwtTokenVerifier::new(SECRET)))
            .with_auth_timeout(auth_timeout),
    );

    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Connect with a valid bearer token in the upgrade request headers.
async fn connect_with_bearer(addr: SocketAddr, user_id: UserId) -> WsStream {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    let token = issue_token(SECRET, user_id, 3600).unwrap();
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().unwrap(),
    );
    let (stream, _) = connect_async(request).await.unwrap();
    stream
}

/// Connect without credentials, entering the in-band auth flow.
async fn connect_plain(addr: SocketAddr) -> WsStream {
    let (stream, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    stream
}

async fn send_frame(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping transport ping/pong.
async fn recv_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Next close frame, skipping any text still queued ahead of it.
async fn recv_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without a close frame")
            .expect("websocket error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame carried no code"),
            _ => continue,
        }
    }
}

/// Authenticate a fresh bearer connection and drain the greeting.
async fn authenticated_client(addr: SocketAddr, user_id: UserId) -> WsStream {
    let mut ws = connect_with_bearer(addr, user_id).await;
    let established = recv_frame(&mut ws).await;
    assert_eq!(established["type"], "connection_established");
    assert_eq!(established["payload"]["user_id"], user_id.0);
    ws
}

async fn enter_room(ws: &mut WsStream, room_id: u64) -> Value {
    send_frame(ws, json!({"type": "enter_room", "payload": {"room_id": room_id}})).await;
    let reply = recv_frame(ws).await;
    assert_eq!(reply["type"], "room_entered", "enter failed: {}", reply);
    reply
}

#[tokio::test]
async fn test_bearer_token_connection_is_established_directly() {
    let addr = start_test_server().await;

    let mut ws = connect_with_bearer(addr, UserId(1)).await;

    let frame = recv_frame(&mut ws).await;
    assert_eq!(frame["type"], "connection_established");
    assert_eq!(frame["payload"]["user_id"], 1);
}

#[tokio::test]
async fn test_inband_auth_flow_succeeds() {
    let addr = start_test_server().await;
    let mut ws = connect_plain(addr).await;

    let frame = recv_frame(&mut ws).await;
    assert_eq!(frame["type"], "auth_required");
    assert_eq!(frame["payload"]["timeout"], 30);

    let token = issue_token(SECRET, UserId(2), 3600).unwrap();
    send_frame(&mut ws, json!({"type": "auth", "payload": {"token": token}})).await;

    let success = recv_frame(&mut ws).await;
    assert_eq!(success["type"], "auth_success");
    assert_eq!(success["payload"]["user_id"], 2);

    let established = recv_frame(&mut ws).await;
    assert_eq!(established["type"], "connection_established");
}

#[tokio::test]
async fn test_inband_auth_accepts_bare_token_object() {
    let addr = start_test_server().await;
    let mut ws = connect_plain(addr).await;
    let _ = recv_frame(&mut ws).await;

    let token = issue_token(SECRET, UserId(1), 3600).unwrap();
    send_frame(&mut ws, json!({"token": token})).await;

    let success = recv_frame(&mut ws).await;
    assert_eq!(success["type"], "auth_success");
}

#[tokio::test]
async fn test_invalid_token_closes_with_policy_violation() {
    let addr = start_test_server().await;
    let mut ws = connect_plain(addr).await;
    let _ = recv_frame(&mut ws).await;

    send_frame(&mut ws, json!({"type": "auth", "payload": {"token": "forged"}})).await;

    let error = recv_frame(&mut ws).await;
    assert_eq!(error["type"], "auth_error");
    assert_eq!(recv_close_code(&mut ws).await, 1008);
}

#[tokio::test]
async fn test_auth_timeout_closes_with_policy_violation_and_no_session() {
    let addr = start_test_server_with_auth_timeout(Duration::from_millis(300)).await;
    let mut ws = connect_plain(addr).await;
    let _ = recv_frame(&mut ws).await;

    // Send nothing and let the deadline expire.
    let error = recv_frame(&mut ws).await;
    assert_eq!(error["type"], "auth_error");
    assert_eq!(recv_close_code(&mut ws).await, 1008);

    let status: Value = reqwest::get(format!("http://{}/ws/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["online_users"], 0);
}

#[tokio::test]
async fn test_ping_pong_round_trip() {
    let addr = start_test_server().await;
    let mut ws = authenticated_client(addr, UserId(1)).await;

    send_frame(&mut ws, json!({"type": "ping"})).await;

    assert_eq!(recv_frame(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_pause_reaches_other_member_exactly_once_and_not_sender() {
    let addr = start_test_server().await;
    let mut alice = authenticated_client(addr, UserId(1)).await;
    let mut bob = authenticated_client(addr, UserId(2)).await;
    enter_room(&mut alice, 42).await;
    enter_room(&mut bob, 42).await;

    send_frame(
        &mut alice,
        json!({"type": "set_vedio_pause", "payload": {"room_id": 42, "progress": 12.5}}),
    )
    .await;

    let broadcast = recv_frame(&mut bob).await;
    assert_eq!(broadcast["type"], "set_vedio_pause");
    assert_eq!(broadcast["payload"]["room_id"], 42);
    assert_eq!(broadcast["payload"]["sender_id"], 1);
    assert_eq!(broadcast["payload"]["progress"], 12.5);

    // A later ping must be the next frame each side sees: bob got exactly
    // one broadcast, alice none at all.
    send_frame(&mut bob, json!({"type": "ping"})).await;
    assert_eq!(recv_frame(&mut bob).await["type"], "pong");
    send_frame(&mut alice, json!({"type": "ping"})).await;
    assert_eq!(recv_frame(&mut alice).await["type"], "pong");
}

#[tokio::test]
async fn test_enter_room_as_non_member_is_rejected() {
    let addr = start_test_server().await;
    let mut carol = authenticated_client(addr, UserId(3)).await;

    send_frame(&mut carol, json!({"type": "enter_room", "payload": {"room_id": 42}})).await;

    let reply = recv_frame(&mut carol).await;
    assert_eq!(reply["type"], "room_enter_error");
    assert_eq!(reply["payload"]["status"], "failed");
}

#[tokio::test]
async fn test_snapshot_survives_leave_and_rejoin() {
    let addr = start_test_server().await;
    let mut alice = authenticated_client(addr, UserId(1)).await;
    enter_room(&mut alice, 42).await;

    send_frame(
        &mut alice,
        json!({
            "type": "set_vedio_url",
            "payload": {"room_id": 42, "url": "https://cdn.example/movie.m3u8", "duration": 5400.0}
        }),
    )
    .await;
    send_frame(&mut alice, json!({"type": "leave_room", "payload": {"room_id": 42}})).await;
    let left = recv_frame(&mut alice).await;
    assert_eq!(left["type"], "room_left");

    // Rejoin well within the grace period: the draining entry kept the url.
    let rejoined = enter_room(&mut alice, 42).await;
    let info = &rejoined["payload"]["room_info"];
    assert_eq!(info["video_url"], "https://cdn.example/movie.m3u8");
    assert_eq!(info["video_duration"], 5400.0);
    assert_eq!(info["last_operation_type"], "set_url");
    assert_eq!(info["online_users_count"], 1);
}

#[tokio::test]
async fn test_malformed_frame_is_non_fatal() {
    let addr = start_test_server().await;
    let mut ws = authenticated_client(addr, UserId(1)).await;

    ws.send(Message::Text("{not json".to_string().into())).await.unwrap();

    let error = recv_frame(&mut ws).await;
    assert_eq!(error["type"], "error");

    // The loop survived the bad frame.
    send_frame(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv_frame(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn test_ws_status_reflects_sessions_and_rooms() {
    let addr = start_test_server().await;
    let mut alice = authenticated_client(addr, UserId(1)).await;
    let _bob = authenticated_client(addr, UserId(2)).await;
    enter_room(&mut alice, 42).await;

    let status: Value = reqwest::get(format!("http://{}/ws/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(status["websocket_enabled"], true);
    assert_eq!(status["online_users"], 2);
    assert_eq!(status["active_rooms"], 1);
    assert_eq!(status["endpoint"], "/ws");
}

#[tokio::test]
async fn test_notify_endpoint_pushes_through_unicast() {
    let addr = start_test_server().await;
    let mut alice = authenticated_client(addr, UserId(1)).await;
    let client = reqwest::Client::new();

    let delivered: Value = client
        .post(format!("http://{}/api/users/1/notify", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(delivered["delivered"], true);
    assert_eq!(recv_frame(&mut alice).await["type"], "receive_notification");

    let offline: Value = client
        .post(format!("http://{}/api/users/99/notify", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(offline["delivered"], false);
}
