//! Aggregate locking: one writer per logical aggregate, across processes.
//!
//! [`AggregateLockService`] turns `(tenant, aggregate id, aggregate type)`
//! into a coordinator key and takes a time-bounded lease on it. Acquisition
//! never waits: if another command holds the key the caller gets
//! [`LockError::Unavailable`] immediately and should try again later.
//!
//! The lease is released explicitly with [`AggregateLock::release`]. A lock
//! dropped without release is released in the background when a Tokio
//! runtime is available; otherwise the TTL expires it.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_lock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use policystream_core::{AggregateId, TenantId};

pub use in_memory::InMemoryLockCoordinator;
#[cfg(feature = "redis")]
pub use redis_lock::RedisLockCoordinator;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_LOCK_PREFIX: &str = "policystream:lock";

#[derive(Debug, Error)]
pub enum LockError {
    /// Another command holds the lock for this aggregate.
    #[error("aggregate lock unavailable: {key}")]
    Unavailable { key: String },

    /// The coordinator itself failed (connection, protocol).
    #[error("lock coordinator failure: {0}")]
    Coordinator(String),
}

/// Proof of ownership of one coordinator key.
///
/// The token is unique per acquisition, so a holder whose lease expired and
/// was re-acquired by someone else cannot release the new owner's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    token: String,
    ttl: Duration,
}

impl LockLease {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: Uuid::now_v7().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Distributed mutual-exclusion backend.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Try once to take `key` for `ttl`. `Ok(None)` means someone else holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError>;

    /// Release the lease. Returns `false` if it had already expired or changed hands.
    async fn release(&self, lease: &LockLease) -> Result<bool, LockError>;

    /// Whether `lease` still owns its key.
    async fn is_held(&self, lease: &LockLease) -> Result<bool, LockError>;
}

/// Lock scoped to one logical aggregate.
#[derive(Clone)]
pub struct AggregateLockService {
    coordinator: Arc<dyn LockCoordinator>,
    ttl: Duration,
    prefix: String,
}

impl core::fmt::Debug for AggregateLockService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AggregateLockService")
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl AggregateLockService {
    pub fn new(coordinator: Arc<dyn LockCoordinator>) -> Self {
        Self {
            coordinator,
            ttl: DEFAULT_LOCK_TTL,
            prefix: DEFAULT_LOCK_PREFIX.to_string(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Coordinator key for an aggregate: `{prefix}:{tenant}:{type}:{id}`.
    pub fn lock_key(&self, tenant_id: TenantId, aggregate_id: AggregateId, aggregate_type: &str) -> String {
        format!("{}:{tenant_id}:{aggregate_type}:{aggregate_id}", self.prefix)
    }

    /// Take the aggregate lock or fail immediately with [`LockError::Unavailable`].
    #[instrument(skip(self), fields(ttl_ms = self.ttl.as_millis() as u64), err)]
    pub async fn acquire_lock_or_fail(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
    ) -> Result<AggregateLock, LockError> {
        let key = self.lock_key(tenant_id, aggregate_id, aggregate_type);

        match self.coordinator.acquire(&key, self.ttl).await? {
            Some(lease) => {
                debug!(key = %key, "aggregate lock acquired");
                Ok(AggregateLock {
                    lease: Some(lease),
                    coordinator: Arc::clone(&self.coordinator),
                })
            }
            None => Err(LockError::Unavailable { key }),
        }
    }
}

/// A held aggregate lock.
#[must_use = "dropping the lock releases it"]
pub struct AggregateLock {
    lease: Option<LockLease>,
    coordinator: Arc<dyn LockCoordinator>,
}

impl core::fmt::Debug for AggregateLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AggregateLock").field("lease", &self.lease).finish_non_exhaustive()
    }
}

impl AggregateLock {
    pub fn key(&self) -> &str {
        self.lease.as_ref().map(LockLease::key).unwrap_or_default()
    }

    /// Ask the coordinator whether this lock still owns its key (the TTL may have run out).
    pub async fn is_held(&self) -> Result<bool, LockError> {
        match &self.lease {
            Some(lease) => self.coordinator.is_held(lease).await,
            None => Ok(false),
        }
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        if self.coordinator.release(&lease).await? {
            debug!(key = %lease.key(), "aggregate lock released");
        } else {
            warn!(key = %lease.key(), "aggregate lock expired before release");
        }
        Ok(())
    }

    /// [`release`](Self::release), logging instead of returning a coordinator failure.
    /// An unreleased key expires with the TTL.
    pub async fn release_or_warn(self) {
        if let Err(err) = self.release().await {
            warn!(error = %err, "aggregate lock release failed");
        }
    }
}

impl Drop for AggregateLock {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let coordinator = Arc::clone(&self.coordinator);
                handle.spawn(async move {
                    if let Err(err) = coordinator.release(&lease).await {
                        warn!(key = %lease.key(), error = %err, "background lock release failed");
                    }
                });
            }
            Err(_) => {
                debug!(key = %lease.key(), "no runtime to release lock; leaving it to expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AggregateLockService {
        AggregateLockService::new(Arc::new(InMemoryLockCoordinator::new()))
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let locks = service();
        let (t, a) = (TenantId::new(), AggregateId::new());

        let first = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap();
        let err = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap_err();
        assert!(matches!(err, LockError::Unavailable { .. }));

        first.release().await.unwrap();
        let second = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap();
        assert!(second.is_held().await.unwrap());
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn key_includes_tenant_type_and_id() {
        let locks = service();
        let (t, a) = (TenantId::new(), AggregateId::new());

        let quote = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap();
        // Same id under another type or tenant is a different lock.
        let user = locks.acquire_lock_or_fail(t, a, "user").await.unwrap();
        let other_tenant = locks.acquire_lock_or_fail(TenantId::new(), a, "quote").await.unwrap();

        assert_eq!(quote.key(), format!("policystream:lock:{t}:quote:{a}"));
        assert_ne!(quote.key(), user.key());
        assert_ne!(quote.key(), other_tenant.key());
    }

    #[tokio::test]
    async fn expired_lease_is_not_held() {
        let locks = service().with_ttl(Duration::from_millis(20));
        let (t, a) = (TenantId::new(), AggregateId::new());

        let lock = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!lock.is_held().await.unwrap());
        let next = locks.acquire_lock_or_fail(t, a, "quote").await.unwrap();
        // The stale holder cannot release the new owner's lease.
        lock.release().await.unwrap();
        assert!(next.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn dropped_lock_is_released_in_background() {
        let locks = service();
        let (t, a) = (TenantId::new(), AggregateId::new());

        drop(locks.acquire_lock_or_fail(t, a, "quote").await.unwrap());
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(locks.acquire_lock_or_fail(t, a, "quote").await.is_ok());
    }
}
