//! HTTP server module
//!
//! Serves the scrape orchestrator over axum:
//!
//! - `GET /` - Landing page
//! - `GET /health` - Endpoint phases and reload counters as JSON
//! - `GET <metrics path>[?target=<name>]` - One scrape in text exposition format
//! - `POST /-/reload` - Re-read the configuration file

pub mod handlers;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::signal;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::HttpServerConfig;
use crate::scrape::ScrapeOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ScrapeOrchestrator>,
    /// Metrics endpoint path, for the landing page
    pub metrics_path: Arc<str>,
    /// Bounds the number of scrapes served at once; excess requests queue
    pub scrape_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScrapeOrchestrator>, server: &HttpServerConfig) -> Self {
        Self {
            orchestrator,
            metrics_path: Arc::from(server.path.as_str()),
            scrape_permits: Arc::new(Semaphore::new(server.threads.maximum.max(1))),
        }
    }
}

/// Build the router for `state`
pub fn router(state: AppState) -> Router {
    let metrics_path = state.metrics_path.to_string();
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/-/reload", post(handlers::reload))
        .route(&metrics_path, get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse a bind address; `localhost` maps to 127.0.0.1
pub fn parse_bind_address(bind_address: &str) -> Result<IpAddr> {
    if bind_address == "localhost" {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    bind_address.parse().map_err(|e| {
        anyhow::anyhow!(
            "Invalid bind_address '{}': {}. Use an IP address (e.g., '0.0.0.0', '127.0.0.1') or 'localhost'.",
            bind_address,
            e
        )
    })
}

/// Run the HTTP server until a shutdown signal arrives
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails
pub async fn run(orchestrator: Arc<ScrapeOrchestrator>, server: HttpServerConfig) -> Result<()> {
    let addr = SocketAddr::from((parse_bind_address(&server.bind_address)?, server.port));
    let app = router(AppState::new(orchestrator, &server));

    info!(address = %addr, metrics_path = %server.path, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
