//! Redis list-backed FIFO queue
//!
//! Producers `LPUSH` onto the queue list; consumers atomically move the
//! oldest entry into a processing list with `BLMOVE` and remove it with
//! `LREM` on ack. A nack moves the entry back to the consuming end of the
//! queue list, and `recover` does the same for everything a previous process
//! left in the processing list.

use super::{FifoQueue, QueueMessage};
use crate::error::{BackendError, QueueError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const KEY_PREFIX: &str = "alert-host:queue";

// KEYS[1] = processing list, KEYS[2] = queue list, ARGV[1] = entry.
const NACK_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
    redis.call('RPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
";

// Oldest processing entry sits at the right end; moving LEFT to RIGHT keeps
// the original delivery order at the consuming end of the queue.
const RECOVER_SCRIPT: &str = r"
local moved = 0
while redis.call('LMOVE', KEYS[1], KEYS[2], 'LEFT', 'RIGHT') do
    moved = moved + 1
end
return moved
";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    group: String,
    body: String,
}

pub struct RedisFifoQueue {
    name: String,
    key: String,
    processing_key: String,
    conn: MultiplexedConnection,
    // Separate connection so a blocking BLMOVE never stalls producers.
    blocking_conn: MultiplexedConnection,
}

impl RedisFifoQueue {
    pub async fn connect(client: &redis::Client, name: impl Into<String>) -> Result<Self, BackendError> {
        let name = name.into();
        let connect_err = |e: redis::RedisError| BackendError::Connect {
            backend: "redis",
            message: e.to_string(),
        };

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;
        let blocking_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connect_err)?;

        let key = format!("{KEY_PREFIX}:{name}");
        let processing_key = format!("{key}:processing");
        info!(queue = %name, key = %key, "Redis queue connected");

        Ok(Self {
            name,
            key,
            processing_key,
            conn,
            blocking_conn,
        })
    }

    fn backend_err(&self, e: impl std::fmt::Display) -> QueueError {
        QueueError::Backend {
            queue: self.name.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl FifoQueue for RedisFifoQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, group: &str, body: String) -> Result<(), QueueError> {
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            group: group.to_string(),
            body,
        };
        let payload = serde_json::to_string(&envelope).map_err(|e| self.backend_err(e))?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.backend_err(e))?;

        debug!(queue = %self.name, id = %envelope.id, group = %group, "Message enqueued");
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let mut conn = self.blocking_conn.clone();

        // BLMOVE treats a zero timeout as "block forever".
        let mut cmd = redis::cmd(if wait.is_zero() { "LMOVE" } else { "BLMOVE" });
        cmd.arg(&self.key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT");
        if !wait.is_zero() {
            cmd.arg(wait.as_secs_f64());
        }

        let payload: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| self.backend_err(e))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_str(&payload)
            .map_err(|e| self.backend_err(format!("malformed queue entry: {e}")))?;

        Ok(Some(QueueMessage {
            id: envelope.id,
            group: envelope.group,
            body: envelope.body,
            receipt: payload,
        }))
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&message.receipt)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.backend_err(e))?;

        if removed == 0 {
            return Err(QueueError::UnknownReceipt {
                queue: self.name.clone(),
                receipt: message.id.clone(),
            });
        }

        Ok(())
    }

    async fn nack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let moved: i64 = redis::Script::new(NACK_SCRIPT)
            .key(&self.processing_key)
            .key(&self.key)
            .arg(&message.receipt)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.backend_err(e))?;

        if moved == 0 {
            return Err(QueueError::UnknownReceipt {
                queue: self.name.clone(),
                receipt: message.id.clone(),
            });
        }

        debug!(queue = %self.name, id = %message.id, "Message returned for redelivery");
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let moved: i64 = redis::Script::new(RECOVER_SCRIPT)
            .key(&self.processing_key)
            .key(&self.key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.backend_err(e))?;

        Ok(usize::try_from(moved).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope {
            id: "1".to_string(),
            group: "C1".to_string(),
            body: "{}".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["group"], "C1");
        assert_eq!(json["body"], "{}");
    }
}
