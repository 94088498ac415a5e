//! Metrics HTTP Server
//!
//! Provides HTTP endpoint for Prometheus metrics scraping

use crate::metrics::Metrics;
use anyhow::Context;
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    bind_addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, bind_addr: SocketAddr) -> Self {
        Self { metrics, bind_addr }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(export))
            .route("/health", get(|| async { "OK" }))
            .with_state(self.metrics.clone())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", self.bind_addr))?;
        info!(bind_addr = %self.bind_addr, "Metrics server started");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("Metrics server error")?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn export(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], metrics.export_prometheus())
}
