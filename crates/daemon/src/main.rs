//! Offloadq Worker Daemon - Main Entry Point

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use offloadq_daemon::{config::DaemonConfig, telemetry, EchoDispatcher};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (JSON for production, pretty for development)
    let log_format = std::env::var("OFFLOADQ_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("offloadq=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Offloadq worker daemon v{} starting...", VERSION);

    // 2. Initialize OpenTelemetry (optional)
    if let Err(e) = telemetry::init_telemetry() {
        tracing::warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    }

    // 3. Load configuration and run.
    //
    // The binary wires the echo dispatcher; real deployments embed the
    // daemon as a library and supply their provider dispatcher.
    let config = DaemonConfig::from_env();
    info!(
        namespaces = ?config.namespaces,
        workers_per_namespace = config.workers_per_namespace,
        "Configuration loaded"
    );

    offloadq_daemon::run(config, Arc::new(EchoDispatcher)).await
}
