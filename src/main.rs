//! sentryd - the mask-watching operator sentry daemon.

use slirc_sentry::config::{Config, LogFormat};
use slirc_sentry::db::Database;
use slirc_sentry::engine::Sentry;
use slirc_sentry::transport::{IrcTransport, Transport};
use std::sync::Arc;
use tracing::info;

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `sentry.yaml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "sentry.yaml".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    info!(
        server = %config.server,
        nickname = %config.nickname,
        channel = %config.channel,
        "Starting slirc-sentry"
    );

    let db = Database::new(&config.database).await?;

    let (transport, lines) = IrcTransport::connect(&config).await?;
    transport.register(&config).await?;

    // Signal handler for graceful shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    let transport: Arc<dyn Transport> = transport;
    let sentry = Sentry::new(config, db, transport);
    sentry.run(lines, shutdown_rx).await;

    info!("Engine stopped");
    Ok(())
}
