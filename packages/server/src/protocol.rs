//! Wire protocol for the cinesync WebSocket endpoint.
//!
//! Every frame is a JSON object of the form `{"type": ..., "payload": ...}`.
//! Inbound and outbound frames are modeled as closed enums decoded once at
//! the protocol boundary; unknown inbound types land on an explicit
//! `Unsupported` variant instead of failing the frame loop.
//!
//! The `set_vedio_*` spelling is part of the deployed wire format and is
//! kept verbatim for client compatibility.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code sent on authentication failure or timeout (RFC 6455 1008).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent on malformed JSON during the handshake (RFC 6455 1003).
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// Close code sent on unexpected handshake failures (RFC 6455 1011).
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Message types accepted by the frame loop, advertised in `error` replies.
pub const SUPPORTED_TYPES: [&str; 7] = [
    "ping",
    "enter_room",
    "leave_room",
    "set_vedio_url",
    "set_vedio_start",
    "set_vedio_pause",
    "set_vedio_jump",
];

/// Numeric user identifier, owned by the external account system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Numeric room identifier, owned by the external room directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames sent by clients.
///
/// `enter_room`/`leave_room` keep `room_id` as a raw JSON value so that a
/// missing or non-numeric id yields a typed `room_*_error` reply instead of
/// a decode failure; [`parse_room_id`] does the coercion.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Ping,
    EnterRoom {
        #[serde(default)]
        room_id: Option<Value>,
    },
    LeaveRoom {
        #[serde(default)]
        room_id: Option<Value>,
    },
    SetVedioUrl {
        room_id: RoomId,
        url: String,
        #[serde(default)]
        duration: Option<f64>,
    },
    SetVedioStart {
        room_id: RoomId,
        #[serde(default)]
        progress: f64,
    },
    SetVedioPause {
        room_id: RoomId,
        #[serde(default)]
        progress: f64,
    },
    SetVedioJump {
        room_id: RoomId,
        #[serde(default)]
        video_time_offset: f64,
        #[serde(default)]
        playing: bool,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(other)]
    Unsupported,
}

/// Frames sent by the server, including broadcast copies of playback ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired {
        message: String,
        timeout: u64,
    },
    AuthSuccess {
        message: String,
        user_id: UserId,
    },
    AuthError {
        message: String,
    },
    ConnectionEstablished {
        user_id: UserId,
        message: String,
    },
    Pong,
    RoomEntered {
        room_id: RoomId,
        status: String,
        room_info: RoomInfo,
    },
    RoomEnterError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        status: String,
        message: String,
    },
    RoomLeft {
        room_id: RoomId,
        status: String,
    },
    RoomLeaveError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        status: String,
        message: String,
    },
    SetVedioUrl {
        room_id: RoomId,
        sender_id: UserId,
        url: String,
        timestamp: String,
    },
    SetVedioStart {
        room_id: RoomId,
        sender_id: UserId,
        progress: f64,
        timestamp: String,
    },
    SetVedioPause {
        room_id: RoomId,
        sender_id: UserId,
        progress: f64,
        timestamp: String,
    },
    SetVedioJump {
        room_id: RoomId,
        sender_id: UserId,
        video_time_offset: f64,
        playing: bool,
        timestamp: i64,
    },
    ReceiveNotification,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        supported_types: Option<Vec<String>>,
    },
}

impl ServerMessage {
    /// Generic recoverable protocol error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            supported_types: None,
        }
    }

    /// Error reply for an unknown message type, advertising the supported set.
    pub fn unsupported() -> Self {
        Self::Error {
            message: "unsupported message type".to_string(),
            supported_types: Some(SUPPORTED_TYPES.iter().map(|t| t.to_string()).collect()),
        }
    }
}

/// Snapshot of a room's presence and playback state, sent to joining
/// clients inside `room_entered`. Field names match the deployed format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub online_users_count: usize,
    pub video_url: Option<String>,
    pub video_duration: Option<f64>,
    pub last_operation_type: Option<String>,
    pub last_operation_time: Option<String>,
    pub last_operation_progress: f64,
    pub last_operation_user: Option<UserId>,
    pub last_operation_params: Option<Value>,
}

/// Coerce the raw `room_id` of an `enter_room`/`leave_room` payload.
///
/// Deployed clients send the id as a JSON number or a numeric string;
/// anything else is an invalid request, not a protocol failure.
pub fn parse_room_id(raw: &Option<Value>) -> Option<RoomId> {
    match raw {
        Some(Value::Number(n)) => n.as_u64().map(RoomId),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok().map(RoomId),
        _ => None,
    }
}

/// Extract the auth token from an in-band handshake frame.
///
/// Accepts the typed envelope `{"type":"auth","payload":{"token":...}}` as
/// well as the bare `{"token":...}` object sent by deployed clients.
pub fn auth_token_from_value(value: &Value) -> Option<String> {
    if let Ok(ClientMessage::Auth { token }) = serde_json::from_value(value.clone()) {
        return Some(token);
    }
    value
        .get("token")
        .and_then(Value::as_str)
        .map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_ping_without_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();

        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_decode_enter_room_with_numeric_id() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"enter_room","payload":{"room_id":42}}"#).unwrap();

        let ClientMessage::EnterRoom { room_id } = msg else {
            panic!("expected enter_room");
        };
        assert_eq!(parse_room_id(&room_id), Some(RoomId(42)));
    }

    #[test]
    fn test_parse_room_id_accepts_numeric_strings() {
        assert_eq!(parse_room_id(&Some(json!("7"))), Some(RoomId(7)));
        assert_eq!(parse_room_id(&Some(json!(" 7 "))), Some(RoomId(7)));
    }

    #[test]
    fn test_parse_room_id_rejects_missing_and_garbage() {
        assert_eq!(parse_room_id(&None), None);
        assert_eq!(parse_room_id(&Some(json!(null))), None);
        assert_eq!(parse_room_id(&Some(json!("basement"))), None);
        assert_eq!(parse_room_id(&Some(json!(-3))), None);
    }

    #[test]
    fn test_unknown_type_maps_to_unsupported_variant() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"order_popcorn","payload":{}}"#).unwrap();

        assert!(matches!(msg, ClientMessage::Unsupported));
    }

    #[test]
    fn test_decode_jump_defaults() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_vedio_jump","payload":{"room_id":3}}"#).unwrap();

        let ClientMessage::SetVedioJump {
            room_id,
            video_time_offset,
            playing,
            timestamp,
        } = msg
        else {
            panic!("expected set_vedio_jump");
        };
        assert_eq!(room_id, RoomId(3));
        assert_eq!(video_time_offset, 0.0);
        assert!(!playing);
        assert_eq!(timestamp, 0);
    }

    #[test]
    fn test_pong_serializes_without_payload_key() {
        let json = serde_json::to_value(&ServerMessage::Pong).unwrap();

        assert_eq!(json, json!({"type": "pong"}));
    }

    #[test]
    fn test_broadcast_pause_shape() {
        let msg = ServerMessage::SetVedioPause {
            room_id: RoomId(42),
            sender_id: UserId(1),
            progress: 12.5,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "set_vedio_pause");
        assert_eq!(json["payload"]["room_id"], 42);
        assert_eq!(json["payload"]["sender_id"], 1);
        assert_eq!(json["payload"]["progress"], 12.5);
    }

    #[test]
    fn test_error_reply_omits_absent_supported_types() {
        let json = serde_json::to_value(ServerMessage::error("bad frame")).unwrap();

        assert_eq!(json["payload"], json!({"message": "bad frame"}));
    }

    #[test]
    fn test_auth_token_from_typed_and_bare_frames() {
        let typed = json!({"type": "auth", "payload": {"token": "t-1"}});
        let bare = json!({"token": "t-2"});
        let neither = json!({"type": "ping"});

        assert_eq!(auth_token_from_value(&typed), Some("t-1".to_string()));
        assert_eq!(auth_token_from_value(&bare), Some("t-2".to_string()));
        assert_eq!(auth_token_from_value(&neither), None);
    }
}
