//! REPL command parsing and frame construction.

use serde_json::{Value, json};

use cinesync_shared::time::utc_now_millis;

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Enter(u64),
    Leave,
    SetUrl { url: String, duration: Option<f64> },
    Play { progress: f64 },
    Pause { progress: f64 },
    Seek { offset: f64, playing: bool },
    Help,
    Invalid(String),
}

pub fn help_text() -> &'static str {
    "commands:\n\
     /enter <room_id>        join a room\n\
     /leave                  leave the current room\n\
     /url <url> [duration]   set the shared video url\n\
     /play [progress]        start playback at progress seconds\n\
     /pause [progress]       pause playback at progress seconds\n\
     /seek <secs> [play]     jump to secs, optionally keep playing\n\
     /ping                   keepalive round trip\n\
     /help                   this message"
}

pub fn parse_line(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Command::Help;
    };
    match head {
        "/ping" => Command::Ping,
        "/help" => Command::Help,
        "/enter" => match parts.next().and_then(|p| p.parse::<u64>().ok()) {
            Some(room_id) => Command::Enter(room_id),
            None => Command::Invalid("usage: /enter <room_id>".to_string()),
        },
        "/leave" => Command::Leave,
        "/url" => match parts.next() {
            Some(url) => Command::SetUrl {
                url: url.to_string(),
                duration: parts.next().and_then(|p| p.parse::<f64>().ok()),
            },
            None => Command::Invalid("usage: /url <url> [duration]".to_string()),
        },
        "/play" => Command::Play {
            progress: parts.next().and_then(|p| p.parse::<f64>().ok()).unwrap_or(0.0),
        },
        "/pause" => Command::Pause {
            progress: parts.next().and_then(|p| p.parse::<f64>().ok()).unwrap_or(0.0),
        },
        "/seek" => match parts.next().and_then(|p| p.parse::<f64>().ok()) {
            Some(offset) => Command::Seek {
                offset,
                playing: parts.next() == Some("play"),
            },
            None => Command::Invalid("usage: /seek <secs> [play]".to_string()),
        },
        other => Command::Invalid(format!("unknown command '{}', try /help", other)),
    }
}

impl Command {
    /// Build the wire frame for this command.
    ///
    /// Playback commands need the current room; `Enter` carries its own.
    pub fn into_frame(self, current_room: Option<u64>) -> Result<Value, String> {
        let room = |kind: &str| {
            current_room.ok_or_else(|| format!("join a room with /enter before {}", kind))
        };
        match self {
            Command::Ping => Ok(json!({"type": "ping"})),
            Command::Enter(room_id) => {
                Ok(json!({"type": "enter_room", "payload": {"room_id": room_id}}))
            }
            Command::Leave => {
                let room_id = room("/leave")?;
                Ok(json!({"type": "leave_room", "payload": {"room_id": room_id}}))
            }
            Command::SetUrl { url, duration } => {
                let room_id = room("/url")?;
                Ok(json!({
                    "type": "set_vedio_url",
                    "payload": {"room_id": room_id, "url": url, "duration": duration}
                }))
            }
            Command::Play { progress } => {
                let room_id = room("/play")?;
                Ok(json!({
                    "type": "set_vedio_start",
                    "payload": {"room_id": room_id, "progress": progress}
                }))
            }
            Command::Pause { progress } => {
                let room_id = room("/pause")?;
                Ok(json!({
                    "type": "set_vedio_pause",
                    "payload": {"room_id": room_id, "progress": progress}
                }))
            }
            Command::Seek { offset, playing } => {
                let room_id = room("/seek")?;
                Ok(json!({
                    "type": "set_vedio_jump",
                    "payload": {
                        "room_id": room_id,
                        "video_time_offset": offset,
                        "playing": playing,
                        "timestamp": utc_now_millis(),
                    }
                }))
            }
            Command::Help | Command::Invalid(_) => Err("not a wire command".to_string()),
        }
    }
}
