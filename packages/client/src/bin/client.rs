//! cinesync CLI client.
//!
//! Connects to a cinesync coordinator, authenticates with a bearer token,
//! and drives room presence and playback control from a REPL.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin cinesync-client -- --token <JWT>
//! cargo run --bin cinesync-client -- --token <JWT> --inband
//! ```

use clap::Parser;

use cinesync_client::session::run_client_session;
use cinesync_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "cinesync-client")]
#[command(about = "CLI client for the cinesync video-sync coordinator", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Bearer token identifying this user
    #[arg(short = 't', long)]
    token: String,

    /// Authenticate in-band after connecting instead of via header
    #[arg(long, default_value_t = false)]
    inband: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    if let Err(e) = run_client_session(&args.url, &args.token, args.inband).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
