//! caphub Control Plane
//!
//! The control plane owns the organizational quota ledger and drives
//! project provisioning. It provides the REST API for quota administration
//! and the project lifecycle, and watches rollouts until they converge.

use std::sync::Arc;

use anyhow::Result;
use caphub_control_plane::{
    api, config,
    db::Database,
    lifecycle::{ProjectLifecycle, RolloutMonitor, RolloutSweeper},
    provisioner::{HttpProvisioner, Provisioner, StubProvisioner},
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CAPHUB_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting caphub control plane");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    // Pick the provisioner: a stub in dev mode, the real rollout system
    // otherwise.
    let provisioner: Arc<dyn Provisioner> = if config.dev_mode {
        info!("Using stub provisioner (dev mode)");
        Arc::new(StubProvisioner)
    } else {
        Arc::new(HttpProvisioner::new(&config.provisioner)?)
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Re-attach watch tasks for projects that were mid-flight when the
    // previous process stopped.
    let monitor = Arc::new(RolloutMonitor::new(
        db.pool().clone(),
        provisioner.clone(),
        config.rollout.clone(),
        shutdown_rx.clone(),
    ));
    if let Err(e) = monitor.resume().await {
        error!(error = %e, "Failed to resume in-flight projects");
        return Err(e.into());
    }

    // Start the rollout sweeper in background
    let sweeper = RolloutSweeper::new(monitor.clone(), config.sweep_interval);
    let sweeper_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            sweeper.run(shutdown_rx).await;
        }
    });

    let lifecycle = ProjectLifecycle::new(db.pool().clone(), provisioner, monitor);

    // Create application state
    let state = AppState::new(db, lifecycle);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, sweeper_handle).await {
        warn!(error = %e, "Rollout sweeper did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
