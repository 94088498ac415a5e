//! API Handlers

use super::types::*;
use crate::error::QueueError;
use crate::metrics::Metrics;
use crate::queue::FifoQueue;
use crate::routing::RoutingRules;
use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const ALERTS_RECEIVED_METRIC: &str = "alert_host_alerts_received_total";

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<ArcSwap<RoutingRules>>,
    pub alert_queue: Arc<dyn FifoQueue>,
    pub metrics: Arc<Metrics>,
}

/// Handler failure mapped to a status code and an error body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full { .. } => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Health check handler
pub async fn ping() -> &'static str {
    "pong"
}

/// Accept a single alert
pub async fn post_alert(
    State(state): State<AppState>,
    Json(alert): Json<Alert>,
) -> Result<(StatusCode, Json<ApiResponse<AlertsAccepted>>), ApiError> {
    state.metrics.inc(ALERTS_RECEIVED_METRIC, &["alert"]);
    let accepted = enqueue_alerts(&state, vec![alert]).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))))
}

/// Accept a batch of alerts. Nothing is queued unless every alert routes.
pub async fn post_alerts(
    State(state): State<AppState>,
    Json(batch): Json<AlertBatch>,
) -> Result<(StatusCode, Json<ApiResponse<AlertsAccepted>>), ApiError> {
    state
        .metrics
        .add(ALERTS_RECEIVED_METRIC, batch.alerts.len() as f64, &["alerts"]);
    let accepted = enqueue_alerts(&state, batch.alerts).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))))
}

/// Resolve a route key against the active rules
pub async fn get_route(
    State(state): State<AppState>,
    Path(route_key): Path<String>,
) -> Json<ApiResponse<RouteResolution>> {
    let rules = state.rules.load();
    let matched = rules.resolve(&route_key);

    Json(ApiResponse::success(RouteResolution {
        rule: matched.map(|r| r.name.clone()),
        channel: matched.map(|r| r.channel.clone()),
        route_key,
    }))
}

/// Pick the destination channel: an explicit channel wins over routing.
pub fn destination(rules: &RoutingRules, alert: &Alert) -> Result<String, ApiError> {
    let explicit = alert.slack_channel_id.trim();
    if !explicit.is_empty() {
        return Ok(explicit.to_string());
    }

    let route_key = alert.route_key.trim();
    if route_key.is_empty() {
        return Err(ApiError::BadRequest(
            "alert must have either slackChannelId or routeKey".to_string(),
        ));
    }

    rules
        .channel_for(route_key)
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("no routing rule matches route key '{route_key}'")))
}

async fn enqueue_alerts(state: &AppState, alerts: Vec<Alert>) -> Result<AlertsAccepted, ApiError> {
    if alerts.is_empty() {
        return Err(ApiError::BadRequest("no alerts in request".to_string()));
    }

    // Resolve everything against one rule snapshot before queueing anything.
    let rules = state.rules.load_full();
    let received_at = Utc::now();
    let mut queued = Vec::with_capacity(alerts.len());
    for (index, alert) in alerts.into_iter().enumerate() {
        let channel_id = destination(&rules, &alert).map_err(|e| {
            warn!(index, route_key = %alert.route_key, "Rejected unroutable alert");
            e
        })?;
        queued.push(QueuedAlert {
            id: Uuid::new_v4().to_string(),
            channel_id,
            received_at,
            alert,
        });
    }

    let mut channels: Vec<String> = Vec::new();
    for item in &queued {
        let body = serde_json::to_string(item).map_err(|e| ApiError::Internal(e.to_string()))?;
        state
            .alert_queue
            .enqueue(&item.channel_id, body)
            .await
            .map_err(|e| {
                error!(queue = %state.alert_queue.name(), error = %e, "Failed to enqueue alert");
                ApiError::from(e)
            })?;
        debug!(id = %item.id, channel = %item.channel_id, "Alert queued");
        if !channels.contains(&item.channel_id) {
            channels.push(item.channel_id.clone());
        }
    }

    info!(count = queued.len(), channels = ?channels, "Alerts accepted");
    Ok(AlertsAccepted {
        accepted: queued.len(),
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RoutingRule;

    fn rules() -> RoutingRules {
        RoutingRules::new(vec![
            RoutingRule {
                name: "a".to_string(),
                has_prefix: vec!["a-".to_string()],
                channel: "CXXXXXXXXXXX".to_string(),
                ..Default::default()
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_explicit_channel_wins() {
        let alert = Alert {
            slack_channel_id: "CEXPLICIT".to_string(),
            route_key: "a-service".to_string(),
            ..Default::default()
        };
        assert_eq!(destination(&rules(), &alert).unwrap(), "CEXPLICIT");
    }

    #[test]
    fn test_route_key_is_resolved() {
        let alert = Alert {
            route_key: "A-Service".to_string(),
            ..Default::default()
        };
        assert_eq!(destination(&rules(), &alert).unwrap(), "CXXXXXXXXXXX");
    }

    #[test]
    fn test_unroutable_and_empty_alerts() {
        let unroutable = Alert {
            route_key: "b-service".to_string(),
            ..Default::default()
        };
        assert!(matches!(destination(&rules(), &unroutable), Err(ApiError::BadRequest(_))));
        assert!(matches!(destination(&rules(), &Alert::default()), Err(ApiError::BadRequest(_))));
    }
}
