//! Logging
//!
//! Builds the tracing dispatcher from the startup configuration. The
//! dispatcher is installed as the thread default by `main`, not globally.

use crate::config::StartupConfig;
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Level used when `RUST_LOG` is not set.
pub fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Build the dispatcher: JSON lines or compact console output, filtered by
/// `RUST_LOG` when set, otherwise by the verbose flag.
pub fn build_dispatch(config: &StartupConfig) -> Dispatch {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(config.verbose)));

    if config.log_json {
        let subscriber = Registry::default().with(env_filter).with(
            fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true),
        );
        Dispatch::new(subscriber)
    } else {
        let subscriber = Registry::default().with(env_filter).with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_level(true)
                .with_ansi(true),
        );
        Dispatch::new(subscriber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "info");
    }

    #[test]
    fn test_dispatch_can_be_scoped() {
        let config = StartupConfig {
            log_json: false,
            ..Default::default()
        };
        let dispatch = build_dispatch(&config);

        let _guard = tracing::dispatcher::set_default(&dispatch);
        tracing::info!("scoped logger active");
    }
}
