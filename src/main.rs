use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aviation::cli::{run_command, Cli};
use aviation::config::Config;
use aviation::engine::{spawn_maintenance_task, spawn_metar_refresh_task};
use aviation::weather::AviationWeatherClient;
use aviation::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.command.is_some() {
        return run_command(&cli).await;
    }

    config.validate()?;
    tracing::info!("Starting aviation v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db = aviation::db::init(&config.server.data_dir).await?;

    // Ensure the configured admin user exists
    aviation::api::auth::ensure_admin_user(&db, &config.auth).await?;

    let source = Arc::new(AviationWeatherClient::new(&config.weather)?);
    let state = Arc::new(AppState::new(config.clone(), db, source));

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_maintenance_task(state.clone());
    let refresh_task = spawn_metar_refresh_task(state.clone(), shutdown_rx);

    let app = aviation::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = refresh_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "METAR refresh task did not stop cleanly");
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
