use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;

mod config;
mod error;
mod functions;
mod schema;
mod services;
mod storage;

use config::EngageConfig;
use functions::AppState;
use storage::PgStore;

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngageConfig::from_env()?;
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    if config.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET is not set, every trigger request will be rejected");
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;
    storage::setup_database(&pool)
        .await
        .context("failed to apply migrations")?;
    let store = Arc::new(PgStore::new(pool, config.timezone));

    let state = AppState {
        gateway: services::gateway_from_config(&config.sms)?,
        ledger: store.clone(),
        store,
        config: Arc::new(config),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let clock = state.config.schedule.clone().map(|schedule| {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(err) = functions::clock::clock(state, schedule, shutdown).await {
                tracing::error!(error = %err, "clock daemon stopped");
            }
        })
    });

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", state.config.bind_addr))?;
    tracing::info!(addr = %state.config.bind_addr, "listening");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, functions::build_router(state))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    if let Some(clock) = clock {
        let _ = clock.await;
    }
    Ok(())
}
