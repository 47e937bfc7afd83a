//! Projection rebuild: re-run observers over the event log.
//!
//! The aggregate is folded event by event with `replaying = true`, and each
//! event is dispatched against the state it produced. Writers see the flag
//! on the initializing event and delete the row before recreating it, so a
//! rebuild converges no matter how often it runs.
//!
//! Each aggregate is rebuilt under its aggregate lock, the same one commands
//! take. A command cannot append between the rebuild's load and its last
//! dispatch, and a rebuild never starts while a command is still dispatching.
//! A busy aggregate fails fast with [`RebuildError::Lock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, instrument};

use policystream_core::{Aggregate, AggregateId, TenantId};
use policystream_events::{AggregateRoot, DispatchError, DomainEvent, EventDispatcher, StreamError};

use crate::event_store::{EventStore, EventStoreError};
use crate::lock::{AggregateLockService, LockError};

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("corrupt event stream: {0}")]
    Stream(#[from] StreamError),

    #[error("projection error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A command (or another rebuild) holds the aggregate; try again later.
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("rebuild cancelled")]
    Cancelled,
}

impl RebuildError {
    pub fn is_contended(&self) -> bool {
        matches!(self, RebuildError::Lock(LockError::Unavailable { .. }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub aggregates: u64,
    pub events: u64,
}

/// Shared cancellation flag, checked between aggregates.
#[derive(Debug, Clone, Default)]
pub struct RebuildHandle {
    cancelled: Arc<AtomicBool>,
}

impl RebuildHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

pub struct ProjectionRebuilder<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    store: Arc<dyn EventStore>,
    dispatcher: Arc<EventDispatcher<A>>,
    locks: AggregateLockService,
    handle: RebuildHandle,
}

impl<A> ProjectionRebuilder<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    pub fn new(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<EventDispatcher<A>>,
        locks: AggregateLockService,
    ) -> Self {
        Self {
            store,
            dispatcher,
            locks,
            handle: RebuildHandle::default(),
        }
    }

    pub fn handle(&self) -> RebuildHandle {
        self.handle.clone()
    }

    /// Replay one aggregate's full history through every observer.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn rebuild_aggregate(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<RebuildReport, RebuildError> {
        let lock = self
            .locks
            .acquire_lock_or_fail(tenant_id, aggregate_id, A::AGGREGATE_TYPE)
            .await?;
        let result = self.replay(tenant_id, aggregate_id).await;
        lock.release_or_warn().await;
        result
    }

    async fn replay(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<RebuildReport, RebuildError> {
        let stored = self
            .store
            .load_stream(tenant_id, A::AGGREGATE_TYPE, aggregate_id)
            .await?;

        let mut root = AggregateRoot::<A>::new(tenant_id, aggregate_id);
        root.begin_replay()?;
        for record in &stored {
            let event = record.decode::<A::Event>()?;
            root.replay_event(&event)?;
            self.dispatcher.dispatch(&root, &event).await?;
        }
        root.end_replay();

        Ok(RebuildReport {
            aggregates: u64::from(!stored.is_empty()),
            events: stored.len() as u64,
        })
    }

    /// Replay every aggregate of type `A` owned by `tenant_id`.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn rebuild_tenant(&self, tenant_id: TenantId) -> Result<RebuildReport, RebuildError> {
        let ids = self.store.aggregate_ids(tenant_id, A::AGGREGATE_TYPE).await?;

        let mut total = RebuildReport::default();
        for aggregate_id in ids {
            if self.handle.is_cancelled() {
                return Err(RebuildError::Cancelled);
            }
            let report = self.rebuild_aggregate(tenant_id, aggregate_id).await?;
            total.aggregates += report.aggregates;
            total.events += report.events;
        }

        info!(aggregates = total.aggregates, events = total.events, "projection rebuild complete");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use policystream_quotes::{InitializeQuote, Quote, QuoteCommand};

    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::lock::InMemoryLockCoordinator;
    use crate::projections::Projections;
    use crate::repository::AggregateRepository;

    async fn seeded() -> (ProjectionRebuilder<Quote>, TenantId, AggregateId) {
        let projections = Projections::in_memory();
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let dispatcher = Arc::new(projections.quote_dispatcher());
        let repository = AggregateRepository::new(Arc::clone(&store), Arc::clone(&dispatcher));

        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());
        let mut root = AggregateRoot::<Quote>::new(tenant_id, quote_id);
        root.handle(&QuoteCommand::Initialize(InitializeQuote {
            name: "Boat".into(),
            product_code: "marine".into(),
            premium_cents: 7_500,
            occurred_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        }))
        .unwrap();
        repository.save(&mut root).await.unwrap();

        let locks = AggregateLockService::new(Arc::new(InMemoryLockCoordinator::new()));
        (ProjectionRebuilder::new(store, dispatcher, locks), tenant_id, quote_id)
    }

    #[tokio::test]
    async fn unknown_aggregate_rebuilds_nothing() {
        let (rebuilder, tenant_id, _) = seeded().await;
        let report = rebuilder.rebuild_aggregate(tenant_id, AggregateId::new()).await.unwrap();
        assert_eq!(report, RebuildReport::default());
    }

    #[tokio::test]
    async fn cancelled_rebuild_stops_before_next_aggregate() {
        let (rebuilder, tenant_id, _) = seeded().await;
        rebuilder.handle().cancel();

        let err = rebuilder.rebuild_tenant(tenant_id).await.unwrap_err();
        assert!(matches!(err, RebuildError::Cancelled));
    }

    #[tokio::test]
    async fn other_tenants_are_untouched() {
        let (rebuilder, _, _) = seeded().await;
        let report = rebuilder.rebuild_tenant(TenantId::new()).await.unwrap();
        assert_eq!(report.aggregates, 0);
    }

    #[tokio::test]
    async fn locked_aggregate_is_not_rebuilt() {
        let (rebuilder, tenant_id, quote_id) = seeded().await;
        let held = rebuilder
            .locks
            .acquire_lock_or_fail(tenant_id, quote_id, Quote::AGGREGATE_TYPE)
            .await
            .unwrap();

        let err = rebuilder.rebuild_aggregate(tenant_id, quote_id).await.unwrap_err();
        assert!(err.is_contended(), "{err}");

        held.release().await.unwrap();
        let report = rebuilder.rebuild_aggregate(tenant_id, quote_id).await.unwrap();
        assert_eq!((report.aggregates, report.events), (1, 1));
    }

    #[tokio::test]
    async fn rebuild_releases_the_lock() {
        let (rebuilder, tenant_id, quote_id) = seeded().await;
        rebuilder.rebuild_aggregate(tenant_id, quote_id).await.unwrap();

        let lock = rebuilder
            .locks
            .acquire_lock_or_fail(tenant_id, quote_id, Quote::AGGREGATE_TYPE)
            .await
            .unwrap();
        lock.release().await.unwrap();
    }
}
