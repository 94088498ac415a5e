//! Amazon SQS FIFO queue
//!
//! Uses the channel as the SQS message group so ordering is kept per channel.
//! Long polling is bounded by the configured wait time; extra messages from a
//! batch receive are buffered locally.

use super::{FifoQueue, QueueMessage};
use crate::config::SqsQueueConfig;
use crate::error::{BackendError, QueueError};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SqsFifoQueue {
    name: String,
    client: Client,
    queue_url: String,
    settings: SqsQueueConfig,
    buffered: Mutex<VecDeque<QueueMessage>>,
}

impl SqsFifoQueue {
    /// Resolve the queue URL for `settings.queue_name`.
    pub async fn connect(client: Client, settings: SqsQueueConfig) -> Result<Self, BackendError> {
        let output = client
            .get_queue_url()
            .queue_name(&settings.queue_name)
            .send()
            .await
            .map_err(|e| BackendError::Connect {
                backend: "sqs",
                message: format!("{}: {}", settings.queue_name, DisplayErrorContext(&e)),
            })?;

        let queue_url = output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Connect {
                backend: "sqs",
                message: format!("no URL returned for queue {}", settings.queue_name),
            })?;

        info!(queue = %settings.queue_name, url = %queue_url, "SQS queue resolved");

        Ok(Self {
            name: settings.queue_name.clone(),
            client,
            queue_url,
            settings,
            buffered: Mutex::new(VecDeque::new()),
        })
    }

    fn backend_err(&self, e: impl std::fmt::Display) -> QueueError {
        QueueError::Backend {
            queue: self.name.clone(),
            message: e.to_string(),
        }
    }

    fn pop_buffered(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut buffered = self
            .buffered
            .lock()
            .map_err(|_| self.backend_err("receive buffer lock poisoned"))?;
        Ok(buffered.pop_front())
    }

    fn convert(&self, message: &Message) -> Option<QueueMessage> {
        let (Some(id), Some(receipt)) = (message.message_id(), message.receipt_handle()) else {
            warn!(queue = %self.name, "Dropping SQS message without id or receipt handle");
            return None;
        };

        let group = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::MessageGroupId))
            .cloned()
            .unwrap_or_default();

        Some(QueueMessage {
            id: id.to_string(),
            group,
            body: message.body().unwrap_or_default().to_string(),
            receipt: receipt.to_string(),
        })
    }
}

/// Long-poll time for a receive call, capped by the queue settings.
fn wait_time_seconds(wait: Duration, max_wait_seconds: i32) -> i32 {
    let requested = i32::try_from(wait.as_secs()).unwrap_or(i32::MAX);
    requested.clamp(0, max_wait_seconds.max(0))
}

#[async_trait]
impl FifoQueue for SqsFifoQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, group: &str, body: String) -> Result<(), QueueError> {
        let dedup_id = Uuid::new_v4().to_string();

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_group_id(group)
            .message_deduplication_id(&dedup_id)
            .message_body(body)
            .send()
            .await
            .map_err(|e| self.backend_err(DisplayErrorContext(&e)))?;

        debug!(
            queue = %self.name,
            group = %group,
            message_id = ?output.message_id(),
            "Message sent to SQS"
        );
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(message) = self.pop_buffered()? {
            return Ok(Some(message));
        }

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.settings.max_number_of_messages)
            .wait_time_seconds(wait_time_seconds(wait, self.settings.wait_time_seconds))
            .visibility_timeout(self.settings.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::MessageGroupId)
            .send()
            .await
            .map_err(|e| self.backend_err(DisplayErrorContext(&e)))?;

        let mut received: VecDeque<QueueMessage> =
            output.messages().iter().filter_map(|m| self.convert(m)).collect();

        let first = received.pop_front();
        if !received.is_empty() {
            let mut buffered = self
                .buffered
                .lock()
                .map_err(|_| self.backend_err("receive buffer lock poisoned"))?;
            buffered.extend(received);
        }

        Ok(first)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .send()
            .await
            .map_err(|e| self.backend_err(DisplayErrorContext(&e)))?;

        Ok(())
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        // A zero visibility timeout makes the message receivable again at once.
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| self.backend_err(DisplayErrorContext(&e)))?;

        debug!(queue = %self.name, id = %message.id, "Message returned for redelivery");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_time_is_capped() {
        assert_eq!(wait_time_seconds(Duration::from_secs(5), 20), 5);
        assert_eq!(wait_time_seconds(Duration::from_secs(60), 20), 20);
        assert_eq!(wait_time_seconds(Duration::ZERO, 20), 0);
        assert_eq!(wait_time_seconds(Duration::from_secs(5), -1), 0);
    }
}
