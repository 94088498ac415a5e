//! Graceful Shutdown Handling
//!
//! One cancellation token is shared by every long-running task. It is
//! cancelled by the first OS termination signal, by the supervisor when a
//! task fails, or directly by callers.

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the process-wide cancellation token.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A handle to the shared token for a task to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the shared token. Later calls are no-ops.
    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            info!(reason = %reason, "Initiating graceful shutdown");
            self.token.cancel();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C and cancel the token. Returns early,
    /// without cancelling anything, once the token is cancelled elsewhere.
    pub async fn listen_for_signals(&self) -> anyhow::Result<()> {
        debug!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            use signal::unix::{signal as unix_signal, SignalKind};

            let mut sigterm = unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
            let mut sigint = unix_signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Signal listener stopping, shutdown already in progress");
                    return Ok(());
                }
                _ = sigterm.recv() => self.trigger("SIGTERM received"),
                _ = sigint.recv() => self.trigger("SIGINT received"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Signal listener stopping, shutdown already in progress");
                    return Ok(());
                }
                result = signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl+C")?;
                    self.trigger("Ctrl+C received");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        coordinator.trigger("first");
        coordinator.trigger("second");

        assert!(token.is_cancelled());
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_listener_stops_when_cancelled_elsewhere() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        let listener = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.listen_for_signals().await })
        };

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), listener).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
