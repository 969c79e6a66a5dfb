//! condoscan - condo-server scan pipeline and Roblox flagging engine.
//!
//! A pool of authenticated scanner sessions continuously pulls candidate
//! users from storage, enriches them with mutual-server and connection data,
//! resolves linked Roblox identities through verification bots, scores
//! message history with an AI classifier and persists flagging decisions.

mod analyzer;
mod config;
mod db;
mod driver;
mod error;
mod events;
mod flag;
mod gateway;
mod limits;
mod models;
mod rest;
mod roblox;
mod scanner;
mod sync;
mod verification;
mod worker;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod testing;

use crate::config::Config;
use crate::db::Database;
use std::path::Path;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
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

    match config.worker.log_format {
        crate::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        crate::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration; a worker with no tokens or broken thresholds
    // must not come up at all.
    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        accounts = config.sync.tokens.len(),
        verification_pairs = config.verification.len(),
        "Starting condoscan"
    );

    // Initialize database
    let db = Database::new(&config.database.path).await?;

    // Spawn signal handler for graceful shutdown
    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
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

            cancel.cancel();
        });
    }

    worker::run(config, db, cancel).await?;

    info!("Worker stopped, waiting for tasks to finish...");
    // Give tasks a moment to flush and close connections
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
