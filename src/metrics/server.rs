//! HTTP server for the Prometheus scrape endpoint.

use crate::metrics::PeerMetrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an error.
    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 9001).into(),
        }
    }
}

impl MetricsServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// HTTP server exposing `GET /metrics`.
///
/// Handlers read the shared [`PeerMetrics`] directly; the gauges handle
/// their own synchronization, so no outer lock is taken.
pub struct MetricsServer {
    config: MetricsServerConfig,
    metrics: Arc<PeerMetrics>,
}

/// A server whose listener is already bound.
pub struct BoundMetricsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    metrics: Arc<PeerMetrics>,
}

impl MetricsServer {
    /// Creates a new metrics server.
    pub fn new(config: MetricsServerConfig, metrics: Arc<PeerMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Binds the listening socket.
    pub async fn bind(self) -> Result<BoundMetricsServer, ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(BoundMetricsServer {
            listener,
            local_addr,
            metrics: self.metrics,
        })
    }

    /// Binds and serves until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        self.bind().await?.serve(shutdown).await
    }
}

impl BoundMetricsServer {
    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves scrape requests until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let app = router(self.metrics);

        tracing::info!(addr = %self.local_addr, "Metrics server listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        tracing::info!("Metrics server stopped");
        Ok(())
    }
}

/// Builds the scrape router.
pub fn router(metrics: Arc<PeerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(metrics): State<Arc<PeerMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
