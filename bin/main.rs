//! Leader election simulator using the standby library.
#![allow(unreachable_pub, dead_code, clippy::missing_const_for_fn, clippy::option_if_let_else)]
//!
//! This binary runs a small cluster of candidate processes against an
//! in-memory coordination service:
//! - every process campaigns for leadership and rejoins after losing it
//! - a chaos task expires or briefly disconnects the current leader
//!
//! ## Usage
//!
//! ```bash
//! # Start with default settings
//! standby
//!
//! # Five candidates, leaders tolerate disconnects for 1.5x the session timeout
//! standby --candidates 5 --threshold 1.5
//!
//! # Start with config file
//! standby --config standby.toml
//! ```

mod config;
mod sim;

use std::time::Duration;

use standby::MemoryService;
use tokio::{signal, sync::watch};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, sim::Cluster};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    info!(?config, "loaded configuration");

    let grace = config.election().grace_period(config.session_timeout())?;
    info!(?grace, "leaders tolerate disconnects up to the grace period");

    // The election root is persistent and must exist before anyone joins
    let service = MemoryService::new();
    service.ensure_path(&config.election_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cluster = Cluster::new(service.clone(), config.clone());
    let tasks = cluster.spawn(shutdown_rx);
    info!(candidates = config.candidates, "cluster started");

    match config.run_for_ms {
        Some(ms) => {
            tokio::select! {
                () = shutdown_signal() => {}
                () = tokio::time::sleep(Duration::from_millis(ms)) => {
                    info!("simulation time elapsed, shutting down");
                }
            }
        }
        None => shutdown_signal().await,
    }

    // Stop every process; each one deletes its candidacy on the way out
    shutdown_tx.send_replace(true);
    for task in tasks {
        task.await?;
    }

    info!(remaining = service.children(&config.election_path).len(), "simulation stopped");
    Ok(())
}

/// Waits for SIGINT or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}
