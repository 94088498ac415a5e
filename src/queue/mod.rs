//! Queue Module
//!
//! FIFO queues carrying alerts from the API server and commands to the
//! alert manager. Messages are ordered per group (the destination channel)
//! and must be acknowledged once processed; unacknowledged messages are
//! redelivered.

pub mod memory;
pub mod redis;
pub mod sqs;

use crate::error::{BackendError, QueueError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use self::redis::RedisFifoQueue;
pub use memory::InMemoryFifoQueue;
pub use sqs::SqsFifoQueue;

/// A message handed out by [`FifoQueue::dequeue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub group: String,
    pub body: String,
    /// Opaque handle passed back to [`FifoQueue::ack`] or [`FifoQueue::nack`].
    pub receipt: String,
}

/// Ordered message queue with explicit acknowledgement.
#[async_trait]
pub trait FifoQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Append `body` to the queue under `group`.
    async fn enqueue(&self, group: &str, body: String) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next deliverable message.
    async fn dequeue(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Confirm processing so the message is not redelivered.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Give up on a delivered message so it is handed out again, ahead of
    /// later messages in its group.
    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Return messages left in flight by a previous process to the queue.
    /// Called once at startup; returns how many were recovered.
    async fn recover(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

/// Queue backend selected by `QUEUE_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Redis,
    Sqs,
    InMemory,
}

impl QueueKind {
    pub const EXPECTED: &'static str = "redis, sqs, in-memory";

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Redis => "redis",
            QueueKind::Sqs => "sqs",
            QueueKind::InMemory => "in-memory",
        }
    }
}

impl FromStr for QueueKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(QueueKind::Redis),
            "sqs" => Ok(QueueKind::Sqs),
            "in-memory" => Ok(QueueKind::InMemory),
            _ => Err(BackendError::UnknownBackendKind {
                kind: "queue",
                value: s.to_string(),
                expected: Self::EXPECTED,
            }),
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_kind_parsing() {
        assert_eq!("redis".parse::<QueueKind>().unwrap(), QueueKind::Redis);
        assert_eq!("SQS".parse::<QueueKind>().unwrap(), QueueKind::Sqs);
        assert_eq!(" in-memory ".parse::<QueueKind>().unwrap(), QueueKind::InMemory);
    }

    #[test]
    fn test_unknown_queue_kind() {
        for value in ["kafka", "", "memory"] {
            match value.parse::<QueueKind>() {
                Err(BackendError::UnknownBackendKind { kind, value: v, .. }) => {
                    assert_eq!(kind, "queue");
                    assert_eq!(v, value);
                }
                other => panic!("expected unknown kind for {value:?}, got {other:?}"),
            }
        }
    }
}
