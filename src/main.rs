//! Capturing HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ http server ──▶ capture middleware ──▶ proxy handler ──▶ upstream
//!     ▲                              │
//!     └──────── CaptureBody ◀────────┘  (response streamed through)
//!                    │
//!                    ▼ finished trace
//!              TraceWriter (bounded queue) ──▶ TraceStore (redb)
//!                                                   ▲
//!   operator ──▶ inspect routes ──▶ render ─────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use traffic_capture::config::{load_config, ProxyConfig};
use traffic_capture::lifecycle::{signals, Shutdown};
use traffic_capture::observability::{logging, metrics};
use traffic_capture::{HttpServer, TraceStore, TraceWriter};

#[derive(Parser)]
#[command(name = "traffic-capture")]
#[command(about = "HTTP proxy that records every exchange for later inspection", long_about = None)]
struct Args {
    /// Path to a TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!("traffic-capture v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        storage_mode = %config.storage.mode,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(TraceStore::from_config(&config.storage)?);
    let (writer, writer_task) = TraceWriter::spawn(
        store.clone(),
        config.storage.queue_capacity,
        Duration::from_millis(config.storage.write_timeout_ms),
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    let server = HttpServer::new(config, store.clone(), writer)?;
    server.run(listener, shutdown.clone()).await?;

    // The server owned the last writer handles; the task ends once drained.
    if let Err(e) = writer_task.await {
        tracing::error!(error = %e, "Trace writer task failed");
    }

    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => tracing::warn!("Trace store still shared at shutdown"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
