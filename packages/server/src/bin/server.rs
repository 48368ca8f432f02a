//! cinesync realtime coordinator server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin cinesync-server
//! cargo run --bin cinesync-server -- --host 0.0.0.0 --port 3000 \
//!     --room 42:1,2,3 --room 7:1
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cinesync_server::{
    auth::JwtTokenVerifier,
    directory::InMemoryRoomDirectory,
    hub::RealtimeHub,
    protocol::{RoomId, UserId},
    runner::run_server,
    state::AppState,
};
use cinesync_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "cinesync-server")]
#[command(about = "Real-time room presence and video sync coordinator", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// HS256 secret used to verify bearer tokens
    #[arg(long, default_value = "dev-secret-change-me")]
    jwt_secret: String,

    /// Grace period in seconds before an empty room is deactivated
    #[arg(long, default_value_t = 300)]
    room_deactivation_delay: u64,

    /// Seed a room into the in-memory directory as ROOM_ID:USER_ID[,USER_ID...]
    /// (repeatable)
    #[arg(long = "room", value_parser = parse_room_spec)]
    rooms: Vec<RoomSpec>,
}

#[derive(Debug, Clone)]
struct RoomSpec {
    room_id: u64,
    members: Vec<u64>,
}

fn parse_room_spec(raw: &str) -> Result<RoomSpec, String> {
    let (room, members) = raw
        .split_once(':')
        .ok_or_else(|| "expected ROOM_ID:USER_ID[,USER_ID...]".to_string())?;
    let room_id = room
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid room id: {}", e))?;
    let members = members
        .split(',')
        .filter(|m| !m.trim().is_empty())
        .map(|m| {
            m.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid user id: {}", e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoomSpec { room_id, members })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    // In production the directory fronts the room service's database; the
    // in-memory implementation makes the binary self-contained.
    let directory = Arc::new(InMemoryRoomDirectory::new());
    for spec in &args.rooms {
        directory
            .seed_room(
                RoomId(spec.room_id),
                spec.members.iter().map(|m| UserId(*m)),
            )
            .await;
        tracing::info!(
            "Seeded room {} with {} members",
            spec.room_id,
            spec.members.len()
        );
    }

    let hub = RealtimeHub::with_grace_period(
        directory,
        Duration::from_secs(args.room_deactivation_delay),
    );
    let verifier = Arc::new(JwtTokenVerifier::new(args.jwt_secret.as_bytes()));
    let state = Arc::new(AppState::new(hub, verifier));

    if let Err(e) = run_server(args.host, args.port, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
