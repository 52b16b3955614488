//! HTTP server exposing the metrics using Axum.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::{collector::BuildCollector, error::ExporterErrorKind, monitoring::BuildMetrics};

/// Shared state for all HTTP handlers.
#[derive(Clone)]
struct ServerState {
    metrics: Arc<BuildMetrics>,
    collector: Arc<BuildCollector>,
    metrics_path: String,
}

/// HTTP server that exposes the build result gauges.
///
/// Binding is separate from serving so that a failure to claim the listen
/// address surfaces at startup, before the process reports ready.
pub struct MonitoringServer {
    listener: TcpListener,
    metrics_path: String,
    state: ServerState,
}

impl MonitoringServer {
    /// Bind the listen address and prepare the server.
    pub async fn bind(
        bind_address: SocketAddr,
        metrics_path: String,
        metrics: Arc<BuildMetrics>,
        collector: Arc<BuildCollector>,
    ) -> Result<Self, ExporterErrorKind> {
        let listener = TcpListener::bind(bind_address).await?;
        info!(
            "Metrics available at http://{}{}",
            bind_address, metrics_path
        );

        Ok(Self {
            listener,
            metrics_path: metrics_path.clone(),
            state: ServerState {
                metrics,
                collector,
                metrics_path,
            },
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ExporterErrorKind> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal completes.
    pub async fn run(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ExporterErrorKind> {
        let app = Router::new()
            .route(&self.metrics_path, get(handle_metrics))
            .route("/healthz", get(handle_probe))
            .route("/readyz", get(handle_probe))
            .fallback(handle_redirect)
            .with_state(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal.await;
                info!("Metrics server received shutdown signal, stopping...");
            })
            .await?;

        info!("Metrics server stopped");
        Ok(())
    }
}

/// Metrics endpoint: nudge the collector, then render whatever samples are
/// currently cached. A scrape never waits on Jenkins.
async fn handle_metrics(State(state): State<ServerState>) -> Response {
    state.collector.trigger();

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Liveness and readiness probes.
async fn handle_probe() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Everything else redirects to the metrics path.
async fn handle_redirect(State(state): State<ServerState>) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, state.metrics_path)],
    )
        .into_response()
}
