//! mtlink - MTConnect machine telemetry collector
//!
//! # Usage
//!
//! ```bash
//! # Run with config.json from the working directory
//! cargo run --release
//!
//! # Run with an explicit config file and address override
//! cargo run --release -- --config /etc/mtlink/config.json --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `MTLINK_CONFIG`: Path to the JSON config file (default: ./config.json)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mtlink::api::{create_app, ApiContext};
use mtlink::config::AppConfig;
use mtlink::metadata::MetadataStore;
use mtlink::mtconnect::client::build_client;
use mtlink::polling::PollingScheduler;
use mtlink::sessions::SessionRegistry;
use mtlink::sink::{DownstreamSink, KafkaSink, LogSink};
use mtlink::store::SnapshotStore;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "mtlink")]
#[command(about = "MTConnect machine telemetry collector")]
#[command(version)]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override the server bind address (default: "0.0.0.0:<server_port>")
    #[arg(short, long)]
    addr: Option<String>,
}

// ============================================================================
// Wiring
// ============================================================================

fn build_sink(config: &AppConfig) -> Result<Arc<dyn DownstreamSink>> {
    if config.kafka_brokers.is_empty() {
        warn!("No kafka_brokers configured, snapshot publishes go to the log sink");
        return Ok(Arc::new(LogSink));
    }
    let sink = KafkaSink::new(config).context("Failed to initialize Kafka producer")?;
    info!(
        brokers = %config.kafka_brokers.join(","),
        topic = %config.kafka_topic,
        "Kafka sink initialized"
    );
    Ok(Arc::new(sink))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config_path = AppConfig::resolve_path(args.config);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;
    let server_addr = args.addr.unwrap_or_else(|| config.server_addr());

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  mtlink - MTConnect Telemetry Collector");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Shared pipeline components
    let client = build_client(Duration::from_millis(config.fetch_timeout_ms))
        .context("Failed to build HTTP client")?;
    let sink = build_sink(&config)?;
    let metadata = Arc::new(MetadataStore::new());
    let store = Arc::new(SnapshotStore::new());
    let scheduler = Arc::new(PollingScheduler::new(
        client.clone(),
        metadata,
        Arc::clone(&store),
        Arc::clone(&sink),
    ));
    let sessions = Arc::new(SessionRegistry::new(client, Arc::clone(&scheduler)));

    let app = create_app(ApiContext {
        sessions,
        scheduler: Arc::clone(&scheduler),
        store,
    });

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {server_addr}"))?;
    info!("✓ HTTP server listening on {}", server_addr);

    // Graceful shutdown: ctrl-c cancels, the server drains, pollers stop.
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let http_cancel = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            http_cancel.cancelled().await;
        })
        .await
        .context("HTTP server error")?;

    scheduler.stop_all();
    sink.close().await;

    info!("");
    info!("✓ mtlink shutdown complete");
    Ok(())
}
