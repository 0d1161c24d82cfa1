//! Reward pipeline worker.
//!
//! Connects to `PostgreSQL`, runs migrations, starts the dispatcher with both
//! workflows and waits for Ctrl-C or SIGTERM.
//!
//! Run with: `cargo run --bin rewards`

use rewardflow_postgres::{PoolSettings, PostgresStepJournal, PostgresStore};
use rewardflow_runtime::metrics::MetricsServer;
use rewards::app::{RewardsApp, Stores};
use rewards::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rewards=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        workers = config.dispatcher.workers,
        mode = ?config.rewards.processing_mode,
        "Starting rewards worker"
    );

    if let Some(addr) = config.server.metrics_addr {
        MetricsServer::new(addr).start()?;
        info!(%addr, "Metrics exporter listening");
    }

    let store = PostgresStore::connect(
        &config.database.url,
        &PoolSettings {
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            connect_timeout: Duration::from_secs(config.database.connect_timeout),
        },
    )
    .await?;
    store.migrate().await?;
    info!("Migrations complete");

    let journal = Arc::new(PostgresStepJournal::new(store.pool().clone()));
    let app = RewardsApp::builder(config.clone(), Stores::shared(Arc::new(store)))
        .with_journal(journal)
        .start();

    shutdown_signal().await;

    let health = app.health();
    info!(status = ?health.status, "Shutting down");
    app.shutdown(config.shutdown_timeout()).await?;

    info!("Rewards worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
