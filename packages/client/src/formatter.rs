//! Formatting of server events for terminal display.

use cinesync_server::protocol::{RoomInfo, ServerMessage};

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Render a decoded server event as a display line.
    pub fn format(message: &ServerMessage) -> String {
        match message {
            ServerMessage::AuthRequired { timeout, .. } => {
                format!("\n[auth] token required within {}s\n", timeout)
            }
            ServerMessage::AuthSuccess { user_id, .. } => {
                format!("\n[auth] authenticated as user {}\n", user_id)
            }
            ServerMessage::AuthError { message } => format!("\n[auth] error: {}\n", message),
            ServerMessage::ConnectionEstablished { user_id, .. } => {
                format!("\n[connected] you are user {}\n", user_id)
            }
            ServerMessage::Pong => "\n[pong]\n".to_string(),
            ServerMessage::RoomEntered {
                room_id, room_info, ..
            } => {
                format!(
                    "\n[room {}] entered\n{}",
                    room_id,
                    Self::format_room_info(room_info)
                )
            }
            ServerMessage::RoomEnterError {
                room_id, message, ..
            } => match room_id {
                Some(room_id) => format!("\n[room {}] enter failed: {}\n", room_id, message),
                None => format!("\n[room] enter failed: {}\n", message),
            },
            ServerMessage::RoomLeft { room_id, .. } => format!("\n[room {}] left\n", room_id),
            ServerMessage::RoomLeaveError {
                room_id, message, ..
            } => match room_id {
                Some(room_id) => format!("\n[room {}] leave failed: {}\n", room_id, message),
                None => format!("\n[room] leave failed: {}\n", message),
            },
            ServerMessage::SetVedioUrl {
                room_id,
                sender_id,
                url,
                ..
            } => format!("\n[room {}] user {} set video url: {}\n", room_id, sender_id, url),
            ServerMessage::SetVedioStart {
                room_id,
                sender_id,
                progress,
                ..
            } => format!(
                "\n[room {}] user {} started playback at {:.1}s\n",
                room_id, sender_id, progress
            ),
            ServerMessage::SetVedioPause {
                room_id,
                sender_id,
                progress,
                ..
            } => format!(
                "\n[room {}] user {} paused at {:.1}s\n",
                room_id, sender_id, progress
            ),
            ServerMessage::SetVedioJump {
                room_id,
                sender_id,
                video_time_offset,
                playing,
                ..
            } => format!(
                "\n[room {}] user {} jumped to {:.1}s ({})\n",
                room_id,
                sender_id,
                video_time_offset,
                if *playing { "playing" } else { "paused" }
            ),
            ServerMessage::ReceiveNotification => {
                "\n[notification] you have new account notifications\n".to_string()
            }
            ServerMessage::Error {
                message,
                supported_types,
            } => match supported_types {
                Some(types) => format!(
                    "\n[error] {} (supported: {})\n",
                    message,
                    types.join(", ")
                ),
                None => format!("\n[error] {}\n", message),
            },
        }
    }

    /// Render an undecodable frame as-is.
    pub fn format_raw(text: &str) -> String {
        format!("\n[raw] {}\n", text)
    }

    fn format_room_info(info: &RoomInfo) -> String {
        let mut output = String::new();
        output.push_str(&format!("  online users: {}\n", info.online_users_count));
        if let Some(url) = &info.video_url {
            output.push_str(&format!("  video: {}\n", url));
        }
        if let Some(duration) = info.video_duration {
            output.push_str(&format!("  duration: {:.0}s\n", duration));
        }
        if let Some(kind) = &info.last_operation_type {
            output.push_str(&format!(
                "  last op: {} at {:.1}s by user {}\n",
                kind,
                info.last_operation_progress,
                info.last_operation_user
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "?".to_string())
            ));
        }
        output
    }
}
