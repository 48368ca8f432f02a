//! WebSocket client session management.

use futures_util::{SinkExt, StreamExt};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use cinesync_server::protocol::ServerMessage;

use crate::{
    commands::{Command, help_text, parse_line},
    error::ClientError,
    formatter::MessageFormatter,
    ui::redisplay_prompt,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Run the client session against `url`.
///
/// With `inband` false the token travels in the upgrade request's
/// `Authorization` header; otherwise the post-connect auth flow is used.
pub async fn run_client_session(url: &str, token: &str, inband: bool) -> Result<(), ClientError> {
    let mut ws_stream = connect(url, token, inband).await?;

    if inband {
        inband_handshake(&mut ws_stream, token).await?;
    }

    tracing::info!("Connected to cinesync server");
    println!("\nType /help for commands. Press Ctrl+C to exit.\n");

    let (mut write, mut read) = ws_stream.split();

    // Spawn a task to print incoming server events
    let mut read_task = tokio::spawn(async move {
        let mut connection_error = false;

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let line = match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(event) => MessageFormatter::format(&event),
                        Err(_) => MessageFormatter::format_raw(&text),
                    };
                    print!("{}", line);
                    redisplay_prompt();
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("Server closed the connection");
                    connection_error = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    connection_error = true;
                    break;
                }
                _ => {}
            }
        }

        connection_error
    });

    // Channel for rustyline input
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();

    // Rustyline is synchronous, so it gets a dedicated blocking thread
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    // Command loop: parse lines, build frames, track the current room
    let mut write_task = tokio::spawn(async move {
        let mut current_room: Option<u64> = None;
        let mut write_error = false;

        while let Some(line) = input_rx.recv().await {
            let command = parse_line(&line);
            match &command {
                Command::Help => {
                    println!("{}", help_text());
                    redisplay_prompt();
                    continue;
                }
                Command::Invalid(reason) => {
                    println!("{}", reason);
                    redisplay_prompt();
                    continue;
                }
                Command::Enter(room_id) => current_room = Some(*room_id),
                Command::Leave => {}
                _ => {}
            }
            let left_room = matches!(command, Command::Leave);

            let frame = match command.into_frame(current_room) {
                Ok(frame) => frame,
                Err(reason) => {
                    println!("{}", reason);
                    redisplay_prompt();
                    continue;
                }
            };
            if left_room {
                current_room = None;
            }

            if let Err(e) = write.send(Message::Text(frame.to_string().into())).await {
                tracing::warn!("Failed to send message: {}", e);
                write_error = true;
                break;
            }
        }

        write_error
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        read_result = &mut read_task => {
            write_task.abort();
            if read_result.unwrap_or(false) {
                return Err(ClientError::ConnectionError("connection lost".to_string()));
            }
        }
        write_result = &mut write_task => {
            read_task.abort();
            if write_result.unwrap_or(false) {
                return Err(ClientError::ConnectionError("connection lost".to_string()));
            }
        }
    }

    Ok(())
}

async fn connect(url: &str, token: &str, inband: bool) -> Result<WsStream, ClientError> {
    if inband {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
        return Ok(stream);
    }

    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
    let bearer = format!("Bearer {}", token)
        .parse()
        .map_err(|_| ClientError::ConnectionError("token is not a valid header value".to_string()))?;
    request.headers_mut().insert("authorization", bearer);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
    Ok(stream)
}

/// Drive the in-band auth flow: wait for `auth_required`, send the token,
/// succeed on `auth_success`.
async fn inband_handshake(ws_stream: &mut WsStream, token: &str) -> Result<(), ClientError> {
    loop {
        let message = ws_stream
            .next()
            .await
            .ok_or_else(|| ClientError::ConnectionError("closed during auth".to_string()))?
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                return Err(ClientError::ConnectionError(
                    "server closed during auth".to_string(),
                ));
            }
            _ => continue,
        };

        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::AuthRequired { .. }) => {
                let frame = serde_json::json!({"type": "auth", "payload": {"token": token}});
                ws_stream
                    .send(Message::Text(frame.to_string().into()))
                    .await
                    .map_err(|e| ClientError::ConnectionError(e.to_string()))?;
            }
            Ok(ServerMessage::AuthSuccess { user_id, .. }) => {
                println!("authenticated as user {}", user_id);
                return Ok(());
            }
            Ok(ServerMessage::AuthError { message }) => {
                return Err(ClientError::AuthFailed(message));
            }
            _ => continue,
        }
    }
}
