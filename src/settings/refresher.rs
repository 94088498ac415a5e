//! Settings Refresher
//!
//! Polls the API and manager settings files on a fixed interval and pushes
//! changed documents into the running services. Change detection is by
//! content fingerprint; read, parse and update failures are logged and retried
//! on the next cycle without disturbing the active settings.

use super::{read_settings, ApiSettings, Fingerprint, ManagerSettings};
use crate::metrics::Metrics;
use crate::service::SettingsUpdate;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often both settings files are polled.
pub const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Counter tracking every refresh attempt by settings kind and outcome.
pub const SETTINGS_RELOADS_METRIC: &str = "alert_host_settings_reloads_total";

/// Which settings document a refresh concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsKind {
    Api,
    Manager,
}

impl SettingsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsKind::Api => "api",
            SettingsKind::Manager => "manager",
        }
    }
}

impl fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of refreshing one settings kind in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// File content matches the active fingerprint.
    Unchanged,
    /// The service accepted the new document.
    Applied,
    /// The file could not be read or parsed.
    ReadFailed,
    /// The service rejected the new document; it will be offered again.
    UpdateFailed,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Applied => "applied",
            RefreshOutcome::ReadFailed => "read_failed",
            RefreshOutcome::UpdateFailed => "update_failed",
        }
    }
}

/// Outcomes of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub manager: RefreshOutcome,
    pub api: RefreshOutcome,
}

/// One settings file bound to the service that consumes it.
pub struct WatchedSettings<S> {
    kind: SettingsKind,
    path: PathBuf,
    fingerprint: Fingerprint,
    target: Arc<dyn SettingsUpdate<S>>,
    failed_updates: u32,
}

impl<S> WatchedSettings<S>
where
    S: DeserializeOwned + Send + Sync + 'static,
{
    /// `baseline` is the fingerprint of the document the service was built with.
    pub fn new(
        kind: SettingsKind,
        path: impl Into<PathBuf>,
        baseline: Fingerprint,
        target: Arc<dyn SettingsUpdate<S>>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            fingerprint: baseline,
            target,
            failed_updates: 0,
        }
    }

    pub fn kind(&self) -> SettingsKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fingerprint of the settings currently active in the service.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Number of update attempts rejected in a row for the pending change.
    pub fn failed_updates(&self) -> u32 {
        self.failed_updates
    }

    /// Read, compare and, on change, push the file into the service.
    pub fn refresh(&mut self) -> RefreshOutcome {
        let (settings, fingerprint) = match read_settings::<S>(&self.path) {
            Ok(read) => read,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "Failed to read settings, keeping active settings");
                return RefreshOutcome::ReadFailed;
            }
        };

        if fingerprint == self.fingerprint {
            debug!(kind = %self.kind, fingerprint = %fingerprint, "Settings unchanged");
            return RefreshOutcome::Unchanged;
        }

        info!(
            kind = %self.kind,
            path = %self.path.display(),
            previous = %self.fingerprint,
            current = %fingerprint,
            "Settings file changed, applying"
        );

        match self.target.update_settings(Arc::new(settings)) {
            Ok(()) => {
                self.fingerprint = fingerprint;
                self.failed_updates = 0;
                info!(kind = %self.kind, fingerprint = %fingerprint, "Settings applied");
                RefreshOutcome::Applied
            }
            Err(e) => {
                // Fingerprint stays put so the same change is offered next cycle.
                self.failed_updates = self.failed_updates.saturating_add(1);
                if self.failed_updates == 1 {
                    error!(kind = %self.kind, error = %e, "Failed to update settings, will retry");
                } else {
                    warn!(
                        kind = %self.kind,
                        error = %e,
                        consecutive_failures = self.failed_updates,
                        "Settings update still failing"
                    );
                }
                RefreshOutcome::UpdateFailed
            }
        }
    }
}

/// Periodic refresher for both settings documents.
pub struct SettingsRefresher {
    manager: WatchedSettings<ManagerSettings>,
    api: WatchedSettings<ApiSettings>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
}

impl SettingsRefresher {
    pub fn new(
        manager: WatchedSettings<ManagerSettings>,
        api: WatchedSettings<ApiSettings>,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.register_counter(
            SETTINGS_RELOADS_METRIC,
            "Settings refresh attempts by settings kind and outcome",
            &["kind", "outcome"],
        );

        Self {
            manager,
            api,
            metrics,
            poll_interval: SETTINGS_POLL_INTERVAL,
        }
    }

    /// Override the poll interval. Production code uses [`SETTINGS_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn manager(&self) -> &WatchedSettings<ManagerSettings> {
        &self.manager
    }

    pub fn api(&self) -> &WatchedSettings<ApiSettings> {
        &self.api
    }

    /// Run one refresh cycle over both settings kinds.
    pub fn refresh_once(&mut self) -> CycleReport {
        let manager = self.manager.refresh();
        self.record(SettingsKind::Manager, manager);

        let api = self.api.refresh();
        self.record(SettingsKind::Api, api);

        CycleReport { manager, api }
    }

    /// Poll until `shutdown` is cancelled. Always returns [`crate::Error::Cancelled`].
    pub async fn run(mut self, shutdown: CancellationToken) -> crate::Result<()> {
        info!(
            interval = ?self.poll_interval,
            manager_settings = %self.manager.path.display(),
            api_settings = %self.api.path.display(),
            "Settings refresher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Settings refresher stopping");
                    return Err(crate::Error::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.refresh_once();
                }
            }
        }
    }

    fn record(&self, kind: SettingsKind, outcome: RefreshOutcome) {
        self.metrics
            .inc(SETTINGS_RELOADS_METRIC, &[kind.as_str(), outcome.as_str()]);
    }
}
