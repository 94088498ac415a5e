//! API Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// An alert as posted by a client.
///
/// Either `slackChannelId` or `routeKey` must be set. Fields the host does
/// not interpret are kept and forwarded to the manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slack_channel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub header: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of `POST /alerts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertBatch {
    pub alerts: Vec<Alert>,
}

/// What the API server puts on the alert queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAlert {
    pub id: String,
    pub channel_id: String,
    pub received_at: DateTime<Utc>,
    pub alert: Alert,
}

/// Result of accepting one or more alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsAccepted {
    pub accepted: usize,
    pub channels: Vec<String>,
}

/// Result of `GET /routes/{routeKey}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResolution {
    pub route_key: String,
    pub rule: Option<String>,
    pub channel: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_keeps_unknown_fields() {
        let json = r#"{"routeKey":"a-db","header":"Disk full","iconEmoji":":fire:"}"#;
        let alert: Alert = serde_json::from_str(json).unwrap();

        assert_eq!(alert.route_key, "a-db");
        assert!(alert.slack_channel_id.is_empty());
        assert_eq!(alert.extra["iconEmoji"], ":fire:");

        let back = serde_json::to_value(&alert).unwrap();
        assert_eq!(back["iconEmoji"], ":fire:");
        assert!(back.get("slackChannelId").is_none());
    }
}
