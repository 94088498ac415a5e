//! In-memory FIFO queue
//!
//! Single-process queue for development and the minimal mode. Messages in the
//! same group are delivered one at a time; a message that is not acked within
//! the visibility timeout becomes deliverable again.

use super::{FifoQueue, QueueMessage};
use crate::error::QueueError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    id: String,
    group: String,
    body: String,
}

#[derive(Debug)]
struct InFlight {
    entry: Entry,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, InFlight>,
}

impl State {
    fn len(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }

    /// Return expired in-flight messages to the ready list in original order.
    fn requeue_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in &expired {
            self.restore(receipt);
        }

        expired.len()
    }

    /// Move an in-flight message back to its place in the ready list.
    fn restore(&mut self, receipt: &str) -> bool {
        let Some(flight) = self.in_flight.remove(receipt) else {
            return false;
        };
        let pos = self
            .ready
            .iter()
            .position(|e| e.seq > flight.entry.seq)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, flight.entry);
        true
    }

    fn take_next(&mut self, visibility: Duration, now: Instant) -> Option<QueueMessage> {
        let busy: HashSet<&str> = self
            .in_flight
            .values()
            .map(|f| f.entry.group.as_str())
            .collect();

        let pos = self.ready.iter().position(|e| !busy.contains(e.group.as_str()))?;
        let entry = self.ready.remove(pos)?;
        let receipt = Uuid::new_v4().to_string();

        let message = QueueMessage {
            id: entry.id.clone(),
            group: entry.group.clone(),
            body: entry.body.clone(),
            receipt: receipt.clone(),
        };

        self.in_flight.insert(
            receipt,
            InFlight {
                entry,
                visible_at: now + visibility,
            },
        );

        Some(message)
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

/// Bounded in-process FIFO queue.
#[derive(Debug)]
pub struct InMemoryFifoQueue {
    name: String,
    capacity: usize,
    visibility_timeout: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryFifoQueue {
    pub fn new(name: impl Into<String>, capacity: usize, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            visibility_timeout,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_CAPACITY, DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Messages currently held, including unacked ones.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Backend {
            queue: self.name.clone(),
            message: "queue state lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl FifoQueue for InMemoryFifoQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, group: &str, body: String) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if state.len() >= self.capacity {
                return Err(QueueError::Full {
                    queue: self.name.clone(),
                    capacity: self.capacity,
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.push_back(Entry {
                seq,
                id: Uuid::new_v4().to_string(),
                group: group.to_string(),
                body,
            });
        }

        debug!(queue = %self.name, group = %group, "Message enqueued");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let now = Instant::now();
                let mut state = self.lock()?;

                let requeued = state.requeue_expired(now);
                if requeued > 0 {
                    warn!(queue = %self.name, count = requeued, "Redelivering unacknowledged messages");
                }

                if let Some(message) = state.take_next(self.visibility_timeout, now) {
                    return Ok(Some(message));
                }

                if now >= deadline {
                    return Ok(None);
                }

                state.next_expiry().map_or(deadline, |expiry| expiry.min(deadline))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if state.in_flight.remove(&message.receipt).is_none() {
                return Err(QueueError::UnknownReceipt {
                    queue: self.name.clone(),
                    receipt: message.receipt.clone(),
                });
            }
        }

        // The group may have another message waiting.
        self.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if !state.restore(&message.receipt) {
                return Err(QueueError::UnknownReceipt {
                    queue: self.name.clone(),
                    receipt: message.receipt.clone(),
                });
            }
        }

        debug!(queue = %self.name, id = %message.id, "Message returned for redelivery");
        self.notify.notify_waiters();
        Ok(())
    }
}
