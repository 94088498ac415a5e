//! API Server

use super::handlers::{self, AppState, ALERTS_RECEIVED_METRIC};
use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::queue::FifoQueue;
use crate::routing::RoutingRules;
use crate::service::{Service, SettingsUpdate};
use crate::settings::ApiSettings;
use crate::Error;
use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// REST API accepting alerts and routing them onto the alert queue.
pub struct ApiServer {
    bind_addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    /// Build the server with its initial settings.
    pub fn new(
        bind_addr: SocketAddr,
        settings: &ApiSettings,
        alert_queue: Arc<dyn FifoQueue>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ServiceError> {
        let rules = RoutingRules::from_settings(settings)?;
        metrics.register_counter(
            ALERTS_RECEIVED_METRIC,
            "Alerts received by the API server by endpoint",
            &["source"],
        );

        Ok(Self {
            bind_addr,
            state: AppState {
                rules: Arc::new(ArcSwap::from_pointee(rules)),
                alert_queue,
                metrics,
            },
        })
    }

    /// The rule set currently used for routing.
    pub fn routing_rules(&self) -> Arc<RoutingRules> {
        self.state.rules.load_full()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ping", get(handlers::ping))
            .route("/alert", post(handlers::post_alert))
            .route("/alerts", post(handlers::post_alerts))
            .route("/routes/:route_key", get(handlers::get_route))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

#[async_trait]
impl Service for ApiServer {
    fn name(&self) -> &'static str {
        "api-server"
    }

    async fn run(&self, shutdown: CancellationToken) -> crate::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.bind_addr))
            .map_err(|e| Error::task(self.name(), e))?;

        info!(bind_addr = %self.bind_addr, rules = self.routing_rules().len(), "API server listening");

        let token = shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("API server error")
            .map_err(|e| Error::task(self.name(), e))?;

        info!("API server stopped");
        if shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Err(Error::task(self.name(), anyhow::anyhow!("server exited unexpectedly")))
    }
}

impl SettingsUpdate<ApiSettings> for ApiServer {
    fn update_settings(&self, settings: Arc<ApiSettings>) -> Result<(), ServiceError> {
        let rules = RoutingRules::from_settings(&settings)?;
        let count = rules.len();
        self.state.rules.store(Arc::new(rules));
        info!(rules = count, "Routing rules updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryFifoQueue;
    use crate::settings::RoutingRule;

    fn server(rules: Vec<RoutingRule>) -> ApiServer {
        ApiServer::new(
            "127.0.0.1:0".parse().unwrap(),
            &ApiSettings { routing_rules: rules },
            Arc::new(InMemoryFifoQueue::with_defaults("alerts")),
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_update_swaps_rules() {
        let server = server(vec![RoutingRule::match_all("fallback", "CZZZZZZZZZZZ")]);
        let before = server.routing_rules();

        let mut next = ApiSettings::default();
        next.routing_rules.push(RoutingRule {
            name: "a".to_string(),
            has_prefix: vec!["a-".to_string()],
            channel: "CXXXXXXXXXXX".to_string(),
            ..Default::default()
        });
        next.routing_rules.push(RoutingRule::match_all("fallback", "CZZZZZZZZZZZ"));
        server.update_settings(Arc::new(next)).unwrap();

        // Readers holding the old snapshot keep it.
        assert_eq!(before.len(), 1);
        assert_eq!(server.routing_rules().len(), 2);
        assert_eq!(server.routing_rules().channel_for("a-x"), Some("CXXXXXXXXXXX"));
    }

    #[test]
    fn test_invalid_update_keeps_active_rules() {
        let server = server(vec![RoutingRule::match_all("fallback", "CZZZZZZZZZZZ")]);

        let broken = ApiSettings {
            routing_rules: vec![RoutingRule::match_all("broken", "")],
        };
        let result = server.update_settings(Arc::new(broken));

        assert!(matches!(result, Err(ServiceError::InvalidSettings(_))));
        assert_eq!(server.routing_rules().rules()[0].name, "fallback");
    }

    #[test]
    fn test_invalid_initial_settings_are_rejected() {
        let result = ApiServer::new(
            "127.0.0.1:0".parse().unwrap(),
            &ApiSettings {
                routing_rules: vec![RoutingRule::match_all("", "C1")],
            },
            Arc::new(InMemoryFifoQueue::with_defaults("alerts")),
            Arc::new(Metrics::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_on_shutdown() {
        let server = server(vec![RoutingRule::match_all("fallback", "C1")]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = server.run(shutdown).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
