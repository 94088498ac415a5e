//! Service Handles
//!
//! The two long-running services (API server and alert manager) implement
//! [`Service`] for the supervisor and [`SettingsUpdate`] for the settings
//! refresher.

use crate::error::ServiceError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A long-running service.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled (returning [`crate::Error::Cancelled`])
    /// or a fatal error occurs.
    async fn run(&self, shutdown: CancellationToken) -> crate::Result<()>;
}

/// Accepts a complete replacement of a settings document.
///
/// Implementations must make the swap safe against their own in-flight
/// readers; callers issue updates serially.
pub trait SettingsUpdate<S>: Send + Sync {
    fn update_settings(&self, settings: Arc<S>) -> Result<(), ServiceError>;
}
