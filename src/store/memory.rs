//! In-memory alert store

use super::{AlertStore, ChannelProcessingState, StoredAlert};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Keeps at most this many alerts; the oldest are dropped first.
const MAX_ALERTS: usize = 10_000;

#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<StoredAlert>>,
    channels: RwLock<HashMap<String, ChannelProcessingState>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored alerts, oldest first.
    pub fn alerts(&self) -> Vec<StoredAlert> {
        self.alerts.read().map(|a| a.clone()).unwrap_or_default()
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Database(format!("{what} lock poisoned"))
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_alert(&self, alert: &StoredAlert) -> Result<(), StoreError> {
        let mut alerts = self.alerts.write().map_err(|_| poisoned("alerts"))?;
        if alerts.len() >= MAX_ALERTS {
            alerts.drain(0..MAX_ALERTS / 10);
        }
        alerts.push(alert.clone());
        debug!(id = %alert.id, channel = %alert.channel_id, "Alert stored in memory");
        Ok(())
    }

    async fn channel_processing_state(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelProcessingState>, StoreError> {
        let channels = self.channels.read().map_err(|_| poisoned("channels"))?;
        Ok(channels.get(channel_id).cloned())
    }

    async fn save_channel_processing_state(
        &self,
        state: &ChannelProcessingState,
    ) -> Result<(), StoreError> {
        let mut channels = self.channels.write().map_err(|_| poisoned("channels"))?;
        channels.insert(state.channel_id.clone(), state.clone());
        Ok(())
    }
}
