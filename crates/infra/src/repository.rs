//! Aggregate repository: load by replay, save with an optimistic version check.
//!
//! ```text
//! save(root)
//!   1. serialize root.uncommitted_events()
//!   2. append with ExpectedVersion::Exact(root.version())   -- atomic, durable
//!   3. root.commit()                                        -- version advances, buffer cleared
//!   4. dispatch each committed event in sequence order      -- detached task
//!   5. release the aggregate lock, if one was handed over   -- same task
//! ```
//!
//! Step 4 runs on its own Tokio task. Once step 2 has committed, cancelling
//! the caller's future cannot stop dispatch halfway; the caller still waits
//! for the result. With [`AggregateRepository::save_locked`] the lock moves
//! into that task and is released only after the last observer has run, so
//! a cancelled caller cannot let the next command's events overtake its own. A dispatch failure is reported as
//! [`RepositoryError::Dispatch`]: the events are safe in the log and
//! [`AggregateRepository::redispatch`] re-runs observers from the failed
//! sequence number. Nothing is retried automatically.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument};

use policystream_core::{Aggregate, AggregateId, ExpectedVersion, TenantId};
use policystream_events::{
    AggregateRoot, DispatchError, DispatchReport, DomainEvent, EventDispatcher, EventEnvelope,
    StreamError,
};

use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};
use crate::lock::AggregateLock;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No events exist for this aggregate id.
    #[error("aggregate {aggregate_type}/{aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// The stream moved on since the aggregate was loaded. Under correct lock
    /// usage this does not happen; it is never retried.
    #[error("concurrency conflict: aggregate loaded at version {expected}, stream is at {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    #[error(transparent)]
    Store(EventStoreError),

    /// Loaded history could not be folded (tenant/aggregate mismatch, gap).
    #[error("corrupt event stream: {0}")]
    Stream(#[from] StreamError),

    /// Events up to `committed_version` are durable but an observer failed.
    #[error("events committed up to version {committed_version}, dispatch failed: {source}")]
    Dispatch {
        committed_version: u64,
        #[source]
        source: DispatchError,
    },

    /// The detached dispatch task panicked or was aborted.
    #[error("dispatch task for version {committed_version} did not complete: {reason}")]
    DispatchAborted { committed_version: u64, reason: String },
}

impl RepositoryError {
    /// First sequence number whose dispatch failed, for [`AggregateRepository::redispatch`].
    pub fn failed_sequence(&self) -> Option<u64> {
        match self {
            RepositoryError::Dispatch { source, .. } => source.sequence_number(),
            _ => None,
        }
    }
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                expected: ExpectedVersion::Exact(expected),
                actual,
            } => RepositoryError::ConcurrencyConflict { expected, actual },
            other => RepositoryError::Store(other),
        }
    }
}

/// Result of a successful [`AggregateRepository::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Aggregate version after the save.
    pub version: u64,
    pub appended: usize,
    pub dispatched: Vec<DispatchReport>,
}

/// Load/save entry point for aggregate type `A`.
pub struct AggregateRepository<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    store: Arc<dyn EventStore>,
    dispatcher: Arc<EventDispatcher<A>>,
}

impl<A> Clone for AggregateRepository<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<A> AggregateRepository<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<EventDispatcher<A>>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher<A>> {
        &self.dispatcher
    }

    /// Rebuild the aggregate by replaying its full history in sequence order.
    #[instrument(
        skip(self),
        fields(aggregate_type = A::AGGREGATE_TYPE, tenant_id = %tenant_id, aggregate_id = %aggregate_id),
        err
    )]
    pub async fn get_by_id(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<AggregateRoot<A>, RepositoryError> {
        let history = self.load_history(tenant_id, aggregate_id).await?;
        if history.is_empty() {
            return Err(RepositoryError::NotFound {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id,
            });
        }
        Ok(AggregateRoot::rehydrate(tenant_id, aggregate_id, history)?)
    }

    /// Like [`get_by_id`](Self::get_by_id) but `None` instead of `NotFound`.
    pub async fn find_by_id(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRoot<A>>, RepositoryError> {
        match self.get_by_id(tenant_id, aggregate_id).await {
            Ok(root) => Ok(Some(root)),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn load_history(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope<A::Event>>, RepositoryError> {
        let stored = self
            .store
            .load_stream(tenant_id, A::AGGREGATE_TYPE, aggregate_id)
            .await?;
        stored
            .iter()
            .map(|e| e.decode::<A::Event>().map_err(RepositoryError::from))
            .collect()
    }
}

impl<A> AggregateRepository<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    /// Persist the uncommitted events, then dispatch them.
    ///
    /// A rejected append (conflict, store failure) leaves `root` untouched
    /// and nothing persisted. After a successful append `root` is committed
    /// even if dispatch then fails.
    #[instrument(
        skip(self, root),
        fields(
            aggregate_type = A::AGGREGATE_TYPE,
            tenant_id = %root.tenant_id(),
            aggregate_id = %root.id(),
            version = root.version(),
            pending = root.uncommitted_events().len(),
        ),
        err
    )]
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<SaveReport, RepositoryError> {
        self.persist(root, None).await
    }

    /// [`save`](Self::save) while holding the aggregate's lock.
    ///
    /// The lock is released on every path: straight away when nothing is
    /// appended, otherwise by the dispatch task once the last observer has
    /// returned, even if this future is dropped first.
    #[instrument(
        skip(self, root, lock),
        fields(
            aggregate_type = A::AGGREGATE_TYPE,
            tenant_id = %root.tenant_id(),
            aggregate_id = %root.id(),
            version = root.version(),
            pending = root.uncommitted_events().len(),
        ),
        err
    )]
    pub async fn save_locked(
        &self,
        root: &mut AggregateRoot<A>,
        lock: AggregateLock,
    ) -> Result<SaveReport, RepositoryError> {
        self.persist(root, Some(lock)).await
    }

    async fn persist(
        &self,
        root: &mut AggregateRoot<A>,
        lock: Option<AggregateLock>,
    ) -> Result<SaveReport, RepositoryError> {
        if !root.has_uncommitted_events() {
            if let Some(lock) = lock {
                lock.release_or_warn().await;
            }
            return Ok(SaveReport {
                version: root.version(),
                ..SaveReport::default()
            });
        }

        if let Err(err) = self.append(root).await {
            if let Some(lock) = lock {
                lock.release_or_warn().await;
            }
            return Err(err);
        }

        let committed = root.commit();
        let committed_version = root.version();
        let appended = committed.len();

        let dispatcher = Arc::clone(&self.dispatcher);
        let snapshot = root.clone();
        let dispatch = tokio::spawn(async move {
            let result = dispatcher.dispatch_all(&snapshot, &committed).await;
            if let Some(lock) = lock {
                lock.release_or_warn().await;
            }
            result
        });

        let dispatched = match dispatch.await {
            Ok(Ok(reports)) => reports,
            Ok(Err(source)) => {
                error!(
                    committed_version,
                    failed_sequence = source.sequence_number(),
                    error = %source,
                    "events committed but dispatch failed"
                );
                return Err(RepositoryError::Dispatch {
                    committed_version,
                    source,
                });
            }
            Err(join) => {
                return Err(RepositoryError::DispatchAborted {
                    committed_version,
                    reason: join.to_string(),
                });
            }
        };

        info!(version = committed_version, appended, "aggregate saved");
        Ok(SaveReport {
            version: committed_version,
            appended,
            dispatched,
        })
    }

    async fn append(&self, root: &AggregateRoot<A>) -> Result<(), RepositoryError> {
        let batch = root
            .uncommitted_events()
            .iter()
            .map(UncommittedEvent::from_envelope)
            .collect::<Result<Vec<_>, _>>()?;

        self.store
            .append(batch, ExpectedVersion::Exact(root.version()))
            .await?;
        Ok(())
    }

    /// Re-run every observer for events `>= from_sequence` (the retry path for
    /// a failed dispatch). Observers see the aggregate at its current head.
    #[instrument(
        skip(self),
        fields(aggregate_type = A::AGGREGATE_TYPE, tenant_id = %tenant_id, aggregate_id = %aggregate_id),
        err
    )]
    pub async fn redispatch(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        from_sequence: u64,
    ) -> Result<Vec<DispatchReport>, RepositoryError> {
        let history = self.load_history(tenant_id, aggregate_id).await?;
        if history.is_empty() {
            return Err(RepositoryError::NotFound {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id,
            });
        }

        let pending: Vec<EventEnvelope<A::Event>> = history
            .iter()
            .filter(|e| e.sequence_number() >= from_sequence)
            .cloned()
            .collect();
        let root = AggregateRoot::rehydrate(tenant_id, aggregate_id, history)?;

        self.dispatcher
            .dispatch_all(&root, &pending)
            .await
            .map_err(|source| RepositoryError::Dispatch {
                committed_version: root.version(),
                source,
            })
    }
}
