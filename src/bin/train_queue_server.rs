//! Train queue HTTP server.
//!
//! Runs the turn queue, the job scheduler and the HTTP API around one
//! gateway. Without a radio driver the gateway drives a mock locomotive.
//!
//! # Usage
//!
//! ```sh
//! cargo run --features web --bin train_queue_server
//! ```
//!
//! # Configuration
//!
//! Read from the environment (a `.env` file is loaded first):
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TRAIN_QUEUE_TIMEOUT` | 300 |
//! | `TRAIN_IDLE_TIMEOUT` | 600 |
//! | `TRAIN_ADDRESS` | unset (mock mode) |
//! | `TRAIN_SERVER_HOST` | 0.0.0.0 |
//! | `TRAIN_SERVER_PORT` | 8000 |
//! | `TRAIN_JOBS_FILE` | scheduled_jobs.json |
//!
//! Log filtering follows `RUST_LOG` (default `info`).

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use train_queue::gateway::{Backoff, DeviceGateway};
use train_queue::hal::MockDevice;
use train_queue::services::{run_server, AppState, WebServerConfig};
use train_queue::store::JsonFileStore;
use train_queue::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        control_timeout_secs = config.queue.control_timeout_secs,
        idle_timeout_secs = config.queue.idle_timeout_secs,
        jobs_file = %config.scheduler.jobs_path.display(),
        "starting train queue server"
    );

    if let Some(address) = &config.gateway.device_address {
        tracing::warn!(%address, "no radio driver built in, running in mock mode");
    }

    let gateway = Arc::new(DeviceGateway::new(MockDevice::new()));
    let connected = gateway.connect().await;
    if !connected.success {
        tracing::warn!(error = %connected.message, "initial connection failed, will retry");
    }
    let reconnect = gateway.spawn_reconnect(Backoff::from_config(&config.gateway));

    let store = JsonFileStore::new(&config.scheduler.jobs_path);
    let state = AppState::new(Arc::clone(&gateway), store, &config);
    let idle_monitor = state.start();

    let result = run_server(
        state.clone(),
        WebServerConfig::from_config(&config.web),
        shutdown_signal(),
    )
    .await
    .context("web server failed");

    state.shutdown().await;
    idle_monitor.abort();
    reconnect.abort();
    gateway.disconnect().await;
    tracing::info!("server shutdown complete");

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
