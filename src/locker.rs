//! Channel Lockers
//!
//! Keep two host instances from processing the same channel at once. The
//! no-op locker is enough for a single instance; the Redis locker uses
//! `SET NX PX` with a random token and only deletes keys it still owns.

use crate::error::LockError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

const KEY_PREFIX: &str = "alert-host:channel-lock";
const RETRY_DELAY: Duration = Duration::from_millis(100);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A held channel lock. Pass back to [`ChannelLocker::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLock {
    pub channel: String,
    token: String,
}

impl ChannelLock {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
pub trait ChannelLocker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire the lock for `channel`, waiting up to `max_wait`. The lock
    /// expires after `ttl` if never released.
    async fn obtain(&self, channel: &str, ttl: Duration, max_wait: Duration) -> Result<ChannelLock, LockError>;

    async fn release(&self, lock: ChannelLock) -> Result<(), LockError>;
}

/// Locker for single-instance deployments. Always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChannelLocker;

#[async_trait]
impl ChannelLocker for NoopChannelLocker {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn obtain(&self, channel: &str, _ttl: Duration, _max_wait: Duration) -> Result<ChannelLock, LockError> {
        Ok(ChannelLock::new(channel))
    }

    async fn release(&self, _lock: ChannelLock) -> Result<(), LockError> {
        Ok(())
    }
}

/// Distributed locker on a shared Redis.
pub struct RedisChannelLocker {
    conn: MultiplexedConnection,
    release_script: redis::Script,
}

impl RedisChannelLocker {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    fn key(channel: &str) -> String {
        format!("{KEY_PREFIX}:{channel}")
    }
}

fn backend_err(e: redis::RedisError) -> LockError {
    LockError::Backend(e.to_string())
}

#[async_trait]
impl ChannelLocker for RedisChannelLocker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn obtain(&self, channel: &str, ttl: Duration, max_wait: Duration) -> Result<ChannelLock, LockError> {
        let lock = ChannelLock::new(channel);
        let key = Self::key(channel);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let deadline = Instant::now() + max_wait;
        let mut conn = self.conn.clone();

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&lock.token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;

            if acquired.is_some() {
                debug!(channel = %channel, "Channel lock acquired");
                return Ok(lock);
            }

            if Instant::now() + RETRY_DELAY > deadline {
                return Err(LockError::Contended {
                    channel: channel.to_string(),
                });
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    async fn release(&self, lock: ChannelLock) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(Self::key(&lock.channel))
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;

        if deleted == 0 {
            debug!(channel = %lock.channel, "Channel lock had already expired");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_locker_always_grants() {
        let locker = NoopChannelLocker;
        let first = locker
            .obtain("C1", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();
        let second = locker
            .obtain("C1", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(first.channel, "C1");
        assert_ne!(first, second);
        locker.release(first).await.unwrap();
        locker.release(second).await.unwrap();
    }

    #[test]
    fn test_lock_keys_are_namespaced() {
        assert_eq!(RedisChannelLocker::key("C1"), "alert-host:channel-lock:C1");
    }
}
