//! Alert Manager
//!
//! Consumes the alert and command queues until shutdown. Each alert is
//! processed under its channel lock: persisted, counted in the channel's
//! processing state, then acknowledged. Commands are only honoured for users
//! listed as admins in the live manager settings.

use super::types::{AlertOutcome, Command, CommandOutcome};
use crate::api::QueuedAlert;
use crate::error::{LockError, ServiceError};
use crate::locker::ChannelLocker;
use crate::metrics::Metrics;
use crate::queue::{FifoQueue, QueueMessage};
use crate::service::{Service, SettingsUpdate};
use crate::settings::ManagerSettings;
use crate::store::{AlertStore, ChannelProcessingState, StoredAlert};
use crate::Error;
use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const ALERTS_PROCESSED_METRIC: &str = "alert_host_alerts_processed_total";
pub const COMMANDS_PROCESSED_METRIC: &str = "alert_host_commands_processed_total";

/// Tunables for the manager's consume loops.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Bypass the in-process channel state cache and always read the store.
    pub skip_database_cache: bool,
    /// Zone used when reporting channel activity.
    pub location: chrono_tz::Tz,
    pub poll_wait: Duration,
    pub lock_ttl: Duration,
    pub lock_wait: Duration,
    /// Pause after a queue error before polling again.
    pub error_backoff: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            skip_database_cache: false,
            location: chrono_tz::Europe::Oslo,
            poll_wait: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(30),
            lock_wait: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Backends the manager works against.
pub struct ManagerBackends {
    pub alert_queue: Arc<dyn FifoQueue>,
    pub command_queue: Arc<dyn FifoQueue>,
    pub store: Arc<dyn AlertStore>,
    pub locker: Arc<dyn ChannelLocker>,
}

pub struct AlertManager {
    settings: ArcSwap<ManagerSettings>,
    backends: ManagerBackends,
    metrics: Arc<Metrics>,
    options: ManagerOptions,
    channel_cache: Mutex<HashMap<String, ChannelProcessingState>>,
}

/// Reject manager settings the manager cannot work with.
pub fn validate_settings(settings: &ManagerSettings) -> Result<(), ServiceError> {
    if settings.admin_users.iter().any(|u| u.trim().is_empty()) {
        return Err(ServiceError::InvalidSettings("adminUsers contains an empty entry".to_string()));
    }
    if settings.admin_groups.iter().any(|g| g.trim().is_empty()) {
        return Err(ServiceError::InvalidSettings("adminGroups contains an empty entry".to_string()));
    }
    Ok(())
}

impl AlertManager {
    pub fn new(
        settings: ManagerSettings,
        backends: ManagerBackends,
        metrics: Arc<Metrics>,
        options: ManagerOptions,
    ) -> Result<Self, ServiceError> {
        validate_settings(&settings)?;

        metrics.register_counter(
            ALERTS_PROCESSED_METRIC,
            "Alerts taken off the alert queue by outcome",
            &["outcome"],
        );
        metrics.register_counter(
            COMMANDS_PROCESSED_METRIC,
            "Commands taken off the command queue by outcome",
            &["outcome"],
        );

        Ok(Self {
            settings: ArcSwap::from_pointee(settings),
            backends,
            metrics,
            options,
            channel_cache: Mutex::new(HashMap::new()),
        })
    }

    /// The manager settings currently in effect.
    pub fn settings(&self) -> Arc<ManagerSettings> {
        self.settings.load_full()
    }

    /// Process one alert message. Processed and malformed alerts are
    /// acknowledged; anything else goes back to the queue for redelivery.
    pub async fn handle_alert(&self, message: &QueueMessage) -> AlertOutcome {
        let outcome = self.process_alert(message).await;
        self.metrics.inc(ALERTS_PROCESSED_METRIC, &[outcome.as_str()]);

        if outcome.acknowledge() {
            self.ack(&*self.backends.alert_queue, message).await;
        } else {
            self.nack(&*self.backends.alert_queue, message).await;
        }
        outcome
    }

    /// Process one command message. Commands are always acknowledged.
    pub async fn handle_command(&self, message: &QueueMessage) -> CommandOutcome {
        let outcome = self.process_command(message);
        self.metrics.inc(COMMANDS_PROCESSED_METRIC, &[outcome.as_str()]);
        self.ack(&*self.backends.command_queue, message).await;
        outcome
    }

    async fn process_alert(&self, message: &QueueMessage) -> AlertOutcome {
        let queued: QueuedAlert = match serde_json::from_str(&message.body) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Dropping malformed alert message");
                return AlertOutcome::Malformed;
            }
        };

        let channel = queued.channel_id.clone();
        let lock = match self
            .backends
            .locker
            .obtain(&channel, self.options.lock_ttl, self.options.lock_wait)
            .await
        {
            Ok(lock) => lock,
            Err(LockError::Contended { .. }) => {
                debug!(channel = %channel, "Channel busy, alert left for redelivery");
                return AlertOutcome::LockContended;
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to lock channel");
                return AlertOutcome::Failed;
            }
        };

        let result = self.persist(&queued, &message.body).await;

        if let Err(e) = self.backends.locker.release(lock).await {
            warn!(channel = %channel, error = %e, "Failed to release channel lock");
        }

        match result {
            Ok(state) => {
                info!(
                    id = %queued.id,
                    channel = %channel,
                    processed_alerts = state.processed_alerts,
                    last_processed = %state.last_processed.with_timezone(&self.options.location),
                    "Alert processed"
                );
                AlertOutcome::Processed
            }
            Err(e) => {
                error!(id = %queued.id, channel = %channel, error = %format!("{e:#}"), "Failed to process alert");
                AlertOutcome::Failed
            }
        }
    }

    async fn persist(&self, queued: &QueuedAlert, body: &str) -> anyhow::Result<ChannelProcessingState> {
        let store = &self.backends.store;
        let stored = StoredAlert {
            id: queued.id.clone(),
            channel_id: queued.channel_id.clone(),
            correlation_id: queued.alert.correlation_id.clone(),
            received_at: queued.received_at,
            body: body.to_string(),
        };
        store.save_alert(&stored).await.context("Failed to save alert")?;

        let now = Utc::now();
        let mut state = match self.cached_state(&queued.channel_id) {
            Some(state) => state,
            None => store
                .channel_processing_state(&queued.channel_id)
                .await
                .context("Failed to load channel processing state")?
                .unwrap_or_else(|| ChannelProcessingState::new(&queued.channel_id, now)),
        };
        state.touch(now);

        store
            .save_channel_processing_state(&state)
            .await
            .context("Failed to save channel processing state")?;
        self.cache_state(&state);

        Ok(state)
    }

    fn cached_state(&self, channel_id: &str) -> Option<ChannelProcessingState> {
        if self.options.skip_database_cache {
            return None;
        }
        self.channel_cache.lock().ok()?.get(channel_id).cloned()
    }

    fn cache_state(&self, state: &ChannelProcessingState) {
        if self.options.skip_database_cache {
            return;
        }
        if let Ok(mut cache) = self.channel_cache.lock() {
            cache.insert(state.channel_id.clone(), state.clone());
        }
    }

    fn process_command(&self, message: &QueueMessage) -> CommandOutcome {
        let command: Command = match serde_json::from_str(&message.body) {
            Ok(command) => command,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Dropping malformed command message");
                return CommandOutcome::Malformed;
            }
        };

        let settings = self.settings.load();
        if !settings.is_admin(&command.user_id) {
            warn!(
                action = %command.action,
                channel = %command.channel_id,
                user = %command.user_id,
                "Rejected command from non-admin user"
            );
            return CommandOutcome::Rejected;
        }

        info!(
            app = %settings.app_friendly_name,
            action = %command.action,
            channel = %command.channel_id,
            user = %command.user_id,
            "Command executed"
        );
        CommandOutcome::Executed
    }

    async fn ack(&self, queue: &dyn FifoQueue, message: &QueueMessage) {
        if let Err(e) = queue.ack(message).await {
            warn!(queue = %queue.name(), id = %message.id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn nack(&self, queue: &dyn FifoQueue, message: &QueueMessage) {
        if let Err(e) = queue.nack(message).await {
            warn!(queue = %queue.name(), id = %message.id, error = %e, "Failed to return message to queue");
        }
    }

    /// Put back messages a previous run took but never settled.
    async fn recover(&self, queue: &dyn FifoQueue) -> crate::Result<()> {
        let recovered = queue
            .recover()
            .await
            .with_context(|| format!("Failed to recover in-flight messages on {}", queue.name()))
            .map_err(|e| Error::task(self.name(), e))?;
        if recovered > 0 {
            warn!(queue = %queue.name(), recovered, "Returned unfinished messages to the queue");
        }
        Ok(())
    }

    async fn consume_alerts(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                received = self.backends.alert_queue.dequeue(self.options.poll_wait) => match received {
                    Ok(Some(message)) => {
                        self.handle_alert(&message).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(queue = %self.backends.alert_queue.name(), error = %e, "Failed to read alert queue");
                        self.pause(shutdown).await?;
                    }
                },
            }
        }
    }

    async fn consume_commands(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(Error::Cancelled),
                received = self.backends.command_queue.dequeue(self.options.poll_wait) => match received {
                    Ok(Some(message)) => {
                        self.handle_command(&message).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(queue = %self.backends.command_queue.name(), error = %e, "Failed to read command queue");
                        self.pause(shutdown).await?;
                    }
                },
            }
        }
    }

    async fn pause(&self, shutdown: &CancellationToken) -> crate::Result<()> {
        tokio::select! {
            _ = shutdown.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(self.options.error_backoff) => Ok(()),
        }
    }
}

#[async_trait]
impl Service for AlertManager {
    fn name(&self) -> &'static str {
        "alert-manager"
    }

    async fn run(&self, shutdown: CancellationToken) -> crate::Result<()> {
        self.backends
            .store
            .init()
            .await
            .context("Failed to initialise alert store")
            .map_err(|e| Error::task(self.name(), e))?;
        self.recover(&*self.backends.alert_queue).await?;
        self.recover(&*self.backends.command_queue).await?;

        info!(
            store = self.backends.store.name(),
            locker = self.backends.locker.name(),
            alert_queue = %self.backends.alert_queue.name(),
            command_queue = %self.backends.command_queue.name(),
            "Alert manager started"
        );

        tokio::try_join!(self.consume_alerts(&shutdown), self.consume_commands(&shutdown))?;
        Ok(())
    }
}

impl SettingsUpdate<ManagerSettings> for AlertManager {
    fn update_settings(&self, settings: Arc<ManagerSettings>) -> Result<(), ServiceError> {
        validate_settings(&settings)?;
        let admins = settings.admin_users.len();
        self.settings.store(settings);
        info!(admin_users = admins, "Manager settings updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Alert;
    use crate::error::QueueError;
    use crate::locker::{ChannelLock, NoopChannelLocker};
    use crate::queue::InMemoryFifoQueue;
    use crate::store::InMemoryAlertStore;

    struct Harness {
        manager: Arc<AlertManager>,
        alerts: Arc<InMemoryFifoQueue>,
        commands: Arc<InMemoryFifoQueue>,
        store: Arc<InMemoryAlertStore>,
        metrics: Arc<Metrics>,
    }

    fn harness(settings: ManagerSettings) -> Harness {
        harness_with_locker(settings, Arc::new(NoopChannelLocker))
    }

    fn harness_with_locker(settings: ManagerSettings, locker: Arc<dyn ChannelLocker>) -> Harness {
        let alerts = Arc::new(InMemoryFifoQueue::with_defaults("alerts"));
        let commands = Arc::new(InMemoryFifoQueue::with_defaults("commands"));
        let store = Arc::new(InMemoryAlertStore::new());
        let metrics = Arc::new(Metrics::new());

        let manager = AlertManager::new(
            settings,
            ManagerBackends {
                alert_queue: alerts.clone(),
                command_queue: commands.clone(),
                store: store.clone(),
                locker,
            },
            metrics.clone(),
            ManagerOptions {
                poll_wait: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .unwrap();

        Harness {
            manager: Arc::new(manager),
            alerts,
            commands,
            store,
            metrics,
        }
    }

    /// Locker whose channels are always held elsewhere.
    struct BusyLocker;

    #[async_trait]
    impl ChannelLocker for BusyLocker {
        fn name(&self) -> &'static str {
            "busy"
        }

        async fn obtain(&self, channel: &str, _ttl: Duration, _max_wait: Duration) -> Result<ChannelLock, LockError> {
            Err(LockError::Contended {
                channel: channel.to_string(),
            })
        }

        async fn release(&self, _lock: ChannelLock) -> Result<(), LockError> {
            Ok(())
        }
    }

    /// Queue that records how each delivered message was settled.
    #[derive(Default)]
    struct RecordingQueue {
        pending: Mutex<Vec<QueueMessage>>,
        acked: Mutex<Vec<String>>,
        nacked: Mutex<Vec<String>>,
        recovered: Mutex<usize>,
    }

    #[async_trait]
    impl FifoQueue for RecordingQueue {
        fn name(&self) -> &str {
            "recording"
        }

        async fn enqueue(&self, group: &str, body: String) -> Result<(), QueueError> {
            let id = uuid::Uuid::new_v4().to_string();
            self.pending.lock().unwrap().push(QueueMessage {
                receipt: id.clone(),
                id,
                group: group.to_string(),
                body,
            });
            Ok(())
        }

        async fn dequeue(&self, _wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
            Ok(self.pending.lock().unwrap().pop())
        }

        async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
            self.acked.lock().unwrap().push(message.id.clone());
            Ok(())
        }

        async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
            self.nacked.lock().unwrap().push(message.id.clone());
            Ok(())
        }

        async fn recover(&self) -> Result<usize, QueueError> {
            *self.recovered.lock().unwrap() += 1;
            Ok(0)
        }
    }

    fn manager_on(queue: Arc<RecordingQueue>, locker: Arc<dyn ChannelLocker>) -> AlertManager {
        AlertManager::new(
            ManagerSettings::default(),
            ManagerBackends {
                alert_queue: queue.clone(),
                command_queue: queue,
                store: Arc::new(InMemoryAlertStore::new()),
                locker,
            },
            Arc::new(Metrics::new()),
            ManagerOptions {
                poll_wait: Duration::from_millis(10),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn queued(channel: &str) -> String {
        serde_json::to_string(&QueuedAlert {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel.to_string(),
            received_at: Utc::now(),
            alert: Alert {
                slack_channel_id: channel.to_string(),
                header: "Disk full".to_string(),
                ..Default::default()
            },
        })
        .unwrap()
    }

    fn command(user: &str) -> String {
        serde_json::to_string(&Command {
            action: "resolve".to_string(),
            channel_id: "C1".to_string(),
            user_id: user.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_alert_is_stored_and_acked() {
        let h = harness(ManagerSettings::default());
        h.alerts.enqueue("C1", queued("C1")).await.unwrap();
        h.alerts.enqueue("C1", queued("C1")).await.unwrap();

        for _ in 0..2 {
            let message = h.alerts.dequeue(Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(h.manager.handle_alert(&message).await, AlertOutcome::Processed);
        }

        assert!(h.alerts.is_empty());
        assert_eq!(h.store.alerts().len(), 2);
        let state = h.store.channel_processing_state("C1").await.unwrap().unwrap();
        assert_eq!(state.processed_alerts, 2);
        assert_eq!(
            h.metrics.counter_value(ALERTS_PROCESSED_METRIC, &["processed"]),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_malformed_alert_is_acked() {
        let h = harness(ManagerSettings::default());
        h.alerts.enqueue("C1", "not json".to_string()).await.unwrap();

        let message = h.alerts.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(h.manager.handle_alert(&message).await, AlertOutcome::Malformed);
        assert!(h.alerts.is_empty());
        assert!(h.store.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_command_requires_admin() {
        let h = harness(ManagerSettings {
            admin_users: vec!["U01".to_string()],
            ..Default::default()
        });
        h.commands.enqueue("C1", command("U99")).await.unwrap();
        h.commands.enqueue("C2", command("U01")).await.unwrap();

        let rejected = h.commands.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(h.manager.handle_command(&rejected).await, CommandOutcome::Rejected);
        let executed = h.commands.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(h.manager.handle_command(&executed).await, CommandOutcome::Executed);

        assert!(h.commands.is_empty());
    }

    #[tokio::test]
    async fn test_settings_update_changes_admins() {
        let h = harness(ManagerSettings::default());
        h.commands.enqueue("C1", command("U02")).await.unwrap();

        h.manager
            .update_settings(Arc::new(ManagerSettings {
                admin_users: vec!["U02".to_string()],
                ..Default::default()
            }))
            .unwrap();

        let message = h.commands.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(h.manager.handle_command(&message).await, CommandOutcome::Executed);
        assert_eq!(h.manager.settings().admin_users, vec!["U02"]);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let h = harness(ManagerSettings::default());
        let result = h.manager.update_settings(Arc::new(ManagerSettings {
            admin_users: vec![" ".to_string()],
            ..Default::default()
        }));

        assert!(matches!(result, Err(ServiceError::InvalidSettings(_))));
        assert!(h.manager.settings().admin_users.is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_until_cancelled() {
        let h = harness(ManagerSettings::default());
        h.alerts.enqueue("C1", queued("C1")).await.unwrap();

        let shutdown = CancellationToken::new();
        let task = {
            let manager = h.manager.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { manager.run(shutdown).await })
        };

        for _ in 0..100 {
            if !h.store.alerts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(h.store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_decides_ack_or_nack() {
        let queue = Arc::new(RecordingQueue::default());

        let busy = manager_on(queue.clone(), Arc::new(BusyLocker));
        queue.enqueue("C1", queued("C1")).await.unwrap();
        let contended = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(busy.handle_alert(&contended).await, AlertOutcome::LockContended);
        assert_eq!(*queue.nacked.lock().unwrap(), vec![contended.id.clone()]);
        assert!(queue.acked.lock().unwrap().is_empty());

        let free = manager_on(queue.clone(), Arc::new(NoopChannelLocker));
        queue.enqueue("C1", queued("C1")).await.unwrap();
        let processed = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(free.handle_alert(&processed).await, AlertOutcome::Processed);
        assert_eq!(*queue.acked.lock().unwrap(), vec![processed.id.clone()]);
        assert_eq!(queue.nacked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_contended_alert_is_redelivered_at_once() {
        let h = harness_with_locker(ManagerSettings::default(), Arc::new(BusyLocker));
        h.alerts.enqueue("C1", queued("C1")).await.unwrap();

        let first = h.alerts.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(h.manager.handle_alert(&first).await, AlertOutcome::LockContended);

        // Without the nack the group stays blocked until the visibility timeout.
        let again = h.alerts.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert!(h.store.alerts().is_empty());
        assert_eq!(
            h.metrics.counter_value(ALERTS_PROCESSED_METRIC, &["lock_contended"]),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_run_recovers_queues_on_start() {
        let queue = Arc::new(RecordingQueue::default());
        let manager = manager_on(queue.clone(), Arc::new(NoopChannelLocker));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = manager.run(shutdown).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(*queue.recovered.lock().unwrap(), 2);
    }
}
