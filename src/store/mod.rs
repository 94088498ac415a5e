//! Store Module
//!
//! Persistence for processed alerts and per-channel processing state.

pub mod dynamodb;
pub mod memory;
pub mod postgres;

use crate::error::{BackendError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use dynamodb::DynamoDbAlertStore;
pub use memory::InMemoryAlertStore;
pub use postgres::PostgresAlertStore;

/// An alert as persisted by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAlert {
    pub id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub received_at: DateTime<Utc>,
    /// The alert exactly as it came off the queue.
    pub body: String,
}

/// Bookkeeping for one destination channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProcessingState {
    pub channel_id: String,
    pub created: DateTime<Utc>,
    pub last_processed: DateTime<Utc>,
    pub processed_alerts: u64,
}

impl ChannelProcessingState {
    pub fn new(channel_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            created: now,
            last_processed: now,
            processed_alerts: 0,
        }
    }

    /// Record one more processed alert.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_processed = now;
        self.processed_alerts += 1;
    }
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepare the backend (create tables, verify access).
    async fn init(&self) -> Result<(), StoreError>;

    async fn save_alert(&self, alert: &StoredAlert) -> Result<(), StoreError>;

    async fn channel_processing_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelProcessingState>, StoreError>;

    async fn save_channel_processing_state(
        &self,
        state: &ChannelProcessingState,
    ) -> Result<(), StoreError>;
}

/// Database backend selected by `DATABASE_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    DynamoDb,
    InMemory,
}

impl DatabaseKind {
    pub const EXPECTED: &'static str = "postgres, dynamodb, in-memory";

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::DynamoDb => "dynamodb",
            DatabaseKind::InMemory => "in-memory",
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(DatabaseKind::Postgres),
            "dynamodb" => Ok(DatabaseKind::DynamoDb),
            "in-memory" => Ok(DatabaseKind::InMemory),
            _ => Err(BackendError::UnknownBackendKind {
                kind: "database",
                value: s.to_string(),
                expected: Self::EXPECTED,
            }),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_kind_parsing() {
        assert_eq!("postgres".parse::<DatabaseKind>().unwrap(), DatabaseKind::Postgres);
        assert_eq!("DynamoDB".parse::<DatabaseKind>().unwrap(), DatabaseKind::DynamoDb);
        assert_eq!("in-memory".parse::<DatabaseKind>().unwrap(), DatabaseKind::InMemory);
        assert!(matches!(
            "mysql".parse::<DatabaseKind>(),
            Err(BackendError::UnknownBackendKind { kind: "database", .. })
        ));
    }

    #[test]
    fn test_channel_state_touch() {
        let start = Utc::now();
        let mut state = ChannelProcessingState::new("C1", start);
        let later = start + chrono::Duration::seconds(5);

        state.touch(later);

        assert_eq!(state.created, start);
        assert_eq!(state.last_processed, later);
        assert_eq!(state.processed_alerts, 1);
    }
}
