//! Error Types
//!
//! Every fallible layer of the host has its own error enum; [`Error`] is what
//! the supervisor and `main` see.

use std::path::PathBuf;

/// Startup configuration errors. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment value could not be interpreted.
    #[error("invalid configuration: {key}={value:?}: {reason}")]
    InvalidConfiguration {
        key: String,
        value: String,
        reason: String,
    },

    /// A value required by the selected mode is not set.
    #[error("missing configuration: {key} must be set ({reason})")]
    MissingParameter { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced while reading a settings document.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised while selecting or constructing a backend client.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown {kind} mode: {value:?} (expected one of: {expected})")]
    UnknownBackendKind {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{backend} backend requires {parameter}")]
    MissingParameter {
        backend: &'static str,
        parameter: &'static str,
    },

    #[error("failed to connect to {backend}: {message}")]
    Connect {
        backend: &'static str,
        message: String,
    },
}

/// Queue operation errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue {queue} is full ({capacity} messages)")]
    Full { queue: String, capacity: usize },

    #[error("unknown receipt for queue {queue}: {receipt}")]
    UnknownReceipt { queue: String, receipt: String },

    #[error("queue {queue} backend error: {message}")]
    Backend { queue: String, message: String },
}

/// Alert store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

/// Channel locker errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("channel {channel} is locked by another instance")]
    Contended { channel: String },

    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Errors returned by running services and their settings updates.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Top-level host error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shared cancellation token fired. Not a failure.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A long-running task failed.
    #[error("{task} failed: {source:#}")]
    Task {
        task: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A panic caught at a task boundary or at the top level.
    #[error("panic: {message}\n{backtrace}")]
    Panic { message: String, backtrace: String },
}

impl Error {
    pub fn task(task: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Task {
            task,
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_message() {
        let err = ConfigError::invalid("REDIS_DB", "abc", "not an integer");
        assert_eq!(
            err.to_string(),
            "invalid configuration: REDIS_DB=\"abc\": not an integer"
        );
    }

    #[test]
    fn test_unknown_backend_kind_message() {
        let err = BackendError::UnknownBackendKind {
            kind: "queue",
            value: "kafka".to_string(),
            expected: "redis, sqs, in-memory",
        };
        assert!(err.to_string().contains("unknown queue mode: \"kafka\""));
    }

    #[test]
    fn test_cancelled_detection() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::task("api", anyhow::anyhow!("boom")).is_cancelled());
    }
}
