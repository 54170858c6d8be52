//! counter-server: a roomcast server with a per-room counter.
//!
//! Clients join with `ws://<bind>/ws?room_id=<room>&user_id=<user>`;
//! `curl http://<bind>/ws/rooms` returns a JSON snapshot of every live room.

use std::time::Duration;

use clap::Parser;
use roomcast::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "counter-server", version, about = "WebSocket rooms with a shared counter")]
struct Args {
    /// Address to listen on.
    #[arg(short, long, env = "ROOMCAST_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Counter interval in milliseconds.
    #[arg(long, env = "ROOMCAST_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), RoomcastError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=info,counter_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let room_config = RoomConfig::with_tick_interval(Duration::from_millis(args.tick_ms));

    let server = RoomcastServer::builder()
        .bind(&args.bind)
        .room_config(room_config)
        .build()
        .await?;

    tracing::info!(bind = %args.bind, tick_ms = args.tick_ms, "counter-server starting");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
