//! DynamoDB alert store
//!
//! Single-table layout keyed by `pk`: `alert#<id>` for alerts and
//! `channel#<channel id>` for channel processing state.

use super::{AlertStore, ChannelProcessingState, StoredAlert};
use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use tracing::info;

const PARTITION_KEY: &str = "pk";

pub struct DynamoDbAlertStore {
    client: Client,
    table_name: String,
}

fn timestamp(value: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn read_string(item: &HashMap<String, AttributeValue>, key: &str) -> Result<String, StoreError> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Database(format!("item attribute {key} missing or not a string")))
}

fn read_timestamp(item: &HashMap<String, AttributeValue>, key: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = read_string(item, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("item attribute {key} is not a timestamp: {e}")))
}

fn state_from_item(item: &HashMap<String, AttributeValue>) -> Result<ChannelProcessingState, StoreError> {
    let processed_alerts = item
        .get("processed_alerts")
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(ChannelProcessingState {
        channel_id: read_string(item, "channel_id")?,
        created: read_timestamp(item, "created")?,
        last_processed: read_timestamp(item, "last_processed")?,
        processed_alerts,
    })
}

impl DynamoDbAlertStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Fail early when the table is missing or not reachable.
    pub async fn verify(&self) -> Result<(), BackendError> {
        let output = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|e| BackendError::Connect {
                backend: "dynamodb",
                message: format!("{}: {}", self.table_name, DisplayErrorContext(&e)),
            })?;

        let status = output
            .table()
            .and_then(|t| t.table_status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        info!(table = %self.table_name, status = %status, "DynamoDB table verified");
        Ok(())
    }
}

#[async_trait]
impl AlertStore for DynamoDbAlertStore {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.verify()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn save_alert(&self, alert: &StoredAlert) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(PARTITION_KEY, AttributeValue::S(format!("alert#{}", alert.id)))
            .item("id", AttributeValue::S(alert.id.clone()))
            .item("channel_id", AttributeValue::S(alert.channel_id.clone()))
            .item("received_at", timestamp(alert.received_at))
            .item("body", AttributeValue::S(alert.body.clone()));

        if let Some(correlation_id) = &alert.correlation_id {
            request = request.item("correlation_id", AttributeValue::S(correlation_id.clone()));
        }

        request
            .send()
            .await
            .map_err(|e| StoreError::Database(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn channel_processing_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelProcessingState>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(format!("channel#{channel_id}")))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StoreError::Database(DisplayErrorContext(&e).to_string()))?;

        output.item().map(state_from_item).transpose()
    }

    async fn save_channel_processing_state(
        &self,
        state: &ChannelProcessingState,
    ) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(PARTITION_KEY, AttributeValue::S(format!("channel#{}", state.channel_id)))
            .item("channel_id", AttributeValue::S(state.channel_id.clone()))
            .item("created", timestamp(state.created))
            .item("last_processed", timestamp(state.last_processed))
            .item("processed_alerts", AttributeValue::N(state.processed_alerts.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::Database(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
