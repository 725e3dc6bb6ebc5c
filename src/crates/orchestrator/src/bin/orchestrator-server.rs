//! Session controller binary: loads configuration, builds the upstream
//! gateway/search clients, and serves the health/WebSocket/models routes.

use std::net::SocketAddr;

use orchestrator::api::routes::{build_router, AppState};
use orchestrator::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("fatal panic: {info}");
        std::process::exit(2);
    }));

    tracing::info!("loading session controller configuration");
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            return Err(format!("configuration required: {e}. Set CONFIG_PATH or place config/session.yaml").into());
        }
    };

    tracing::info!(concurrency = config.concurrency, "configuration loaded");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = AppState::new(&config);
    let app = build_router(state);

    tracing::info!("starting session controller on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("session controller shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down");
        }
    }
}
