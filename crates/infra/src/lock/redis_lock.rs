//! Redis-backed distributed lock.
//!
//! Acquire is `SET key token NX PX ttl`. Release and ownership checks compare
//! the stored token first, so only the current owner can delete the key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use super::{LockCoordinator, LockError, LockLease};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisLockCoordinator {
    client: Arc<redis::Client>,
}

impl RedisLockCoordinator {
    /// `redis_url` e.g. `redis://localhost:6379`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LockError::Coordinator(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, LockError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Coordinator(format!("redis connection error: {e}")))
    }
}

fn command_error(err: redis::RedisError) -> LockError {
    LockError::Coordinator(format!("redis command error: {err}"))
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    #[instrument(skip(self), err)]
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let mut conn = self.connection().await?;
        let lease = LockLease::new(key, ttl);

        // Redis rejects PX 0.
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(lease.token())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(reply.map(|_| lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(lease.key())
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(deleted == 1)
    }

    async fn is_held(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let current: Option<String> = redis::cmd("GET")
            .arg(lease.key())
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(current.as_deref() == Some(lease.token()))
    }
}
