use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{LockCoordinator, LockError, LockLease};

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

/// Process-local lock coordinator for tests and single-node runs.
///
/// Honors TTLs the same way the Redis coordinator does; it does not give
/// mutual exclusion across processes.
#[derive(Debug, Default)]
pub struct InMemoryLockCoordinator {
    held: Mutex<HashMap<String, Held>>,
}

impl InMemoryLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> LockError {
    LockError::Coordinator("lock table poisoned".to_string())
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock().map_err(|_| poisoned())?;

        if held.get(key).is_some_and(|h| h.expires_at > now) {
            return Ok(None);
        }

        let lease = LockLease::new(key, ttl);
        held.insert(
            key.to_string(),
            Held {
                token: lease.token().to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, LockError> {
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        match held.get(lease.key()) {
            Some(h) if h.token == lease.token() => {
                let live = h.expires_at > Instant::now();
                held.remove(lease.key());
                Ok(live)
            }
            _ => Ok(false),
        }
    }

    async fn is_held(&self, lease: &LockLease) -> Result<bool, LockError> {
        let held = self.held.lock().map_err(|_| poisoned())?;
        Ok(held
            .get(lease.key())
            .is_some_and(|h| h.token == lease.token() && h.expires_at > Instant::now()))
    }
}
