//! Command execution: lock, load, decide, save, release.
//!
//! ```text
//! create(tenant, id, op)            update(tenant, id, op)
//!   1. acquire aggregate lock         1. acquire aggregate lock
//!   2. AggregateRoot::new             2. repository.get_by_id
//!   3. op(&mut root)                  3. op(&mut root)
//!   4. repository.save_locked         4. repository.save_locked
//!   5. release lock after dispatch    5. release lock after dispatch
//! ```
//!
//! The lock is released whatever steps 2-4 return. Once step 4 has appended,
//! the lock belongs to the dispatch task and outlives a cancelled caller
//! until every observer has seen the new events. Dropping the future before
//! that point releases the lock in the background, and the coordinator TTL
//! covers a process that dies outright.
//!
//! A contended aggregate fails fast with [`CommandError::Lock`]; nothing here
//! waits or retries.

use thiserror::Error;
use tracing::{instrument, warn};

use policystream_core::{Aggregate, AggregateId, TenantId};
use policystream_events::{AggregateRoot, DomainEvent};

use crate::lock::{AggregateLock, AggregateLockService, LockError};
use crate::repository::{AggregateRepository, RepositoryError, SaveReport};

#[derive(Debug, Error)]
pub enum CommandError<E> {
    /// The aggregate refused the command; nothing was persisted.
    #[error("command rejected: {0}")]
    Rejected(E),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl<E> CommandError<E> {
    /// True when another command held the aggregate; safe to retry later.
    pub fn is_contended(&self) -> bool {
        matches!(self, CommandError::Lock(LockError::Unavailable { .. }))
    }
}

/// The aggregate after a successful command, plus what `save` did.
#[derive(Debug)]
pub struct CommandOutcome<A: Aggregate> {
    pub root: AggregateRoot<A>,
    pub report: SaveReport,
}

pub struct CommandExecutor<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    locks: AggregateLockService,
    repository: AggregateRepository<A>,
}

impl<A> CommandExecutor<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    pub fn new(locks: AggregateLockService, repository: AggregateRepository<A>) -> Self {
        Self { locks, repository }
    }

    pub fn repository(&self) -> &AggregateRepository<A> {
        &self.repository
    }

    pub fn locks(&self) -> &AggregateLockService {
        &self.locks
    }

    /// Run `op` against a brand-new aggregate and save it.
    ///
    /// If the id already has history, the save fails with
    /// [`RepositoryError::ConcurrencyConflict`] (expected 0).
    #[instrument(skip(self, op), fields(aggregate_type = A::AGGREGATE_TYPE), err(Debug))]
    pub async fn create<F>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        op: F,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        F: FnOnce(&mut AggregateRoot<A>) -> Result<(), A::Error> + Send,
    {
        self.run(tenant_id, aggregate_id, Start::Fresh, op).await
    }

    /// Load the aggregate, run `op` against it and save the result.
    #[instrument(skip(self, op), fields(aggregate_type = A::AGGREGATE_TYPE), err(Debug))]
    pub async fn update<F>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        op: F,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        F: FnOnce(&mut AggregateRoot<A>) -> Result<(), A::Error> + Send,
    {
        self.run(tenant_id, aggregate_id, Start::Existing, op).await
    }

    /// Shorthand for `create` with a single command.
    pub async fn create_with(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        A::Command: Send,
    {
        self.create(tenant_id, aggregate_id, move |root| root.handle(&command).map(|_| ()))
            .await
    }

    /// Shorthand for `update` with a single command.
    pub async fn update_with(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        A::Command: Send,
    {
        self.update(tenant_id, aggregate_id, move |root| root.handle(&command).map(|_| ()))
            .await
    }

    async fn run<F>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        start: Start,
        op: F,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        F: FnOnce(&mut AggregateRoot<A>) -> Result<(), A::Error> + Send,
    {
        let lock = self.acquire(tenant_id, aggregate_id).await?;

        let prepared = async {
            let mut root = match start {
                Start::Fresh => AggregateRoot::<A>::new(tenant_id, aggregate_id),
                Start::Existing => self.repository.get_by_id(tenant_id, aggregate_id).await?,
            };
            op(&mut root).map_err(CommandError::Rejected)?;
            Ok::<_, CommandError<A::Error>>(root)
        }
        .await;

        let mut root = match prepared {
            Ok(root) => root,
            Err(err) => {
                lock.release_or_warn().await;
                return Err(err);
            }
        };

        let report = self.repository.save_locked(&mut root, lock).await?;
        Ok(CommandOutcome { root, report })
    }

    async fn acquire(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<AggregateLock, CommandError<A::Error>> {
        self.locks
            .acquire_lock_or_fail(tenant_id, aggregate_id, A::AGGREGATE_TYPE)
            .await
            .map_err(|err| {
                if let LockError::Unavailable { key } = &err {
                    warn!(%key, "aggregate busy, command rejected");
                }
                CommandError::Lock(err)
            })
    }
}

enum Start {
    Fresh,
    Existing,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use policystream_core::DomainError;
    use policystream_events::EventDispatcher;
    use policystream_quotes::{BindQuote, InitializeQuote, Quote, QuoteCommand, QuoteStatus, RenameQuote};

    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::lock::InMemoryLockCoordinator;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn executor() -> (CommandExecutor<Quote>, AggregateLockService) {
        let locks = AggregateLockService::new(Arc::new(InMemoryLockCoordinator::new()));
        let repository = AggregateRepository::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(EventDispatcher::new()),
        );
        (CommandExecutor::new(locks.clone(), repository), locks)
    }

    fn initialize(name: &str) -> QuoteCommand {
        QuoteCommand::Initialize(InitializeQuote {
            name: name.into(),
            product_code: "MOTOR".into(),
            premium_cents: 45_000,
            occurred_at: at(1),
        })
    }

    #[tokio::test]
    async fn create_then_update() {
        let (executor, _) = executor();
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());

        let created = executor.create_with(tenant_id, quote_id, initialize("Fleet")).await.unwrap();
        assert_eq!(created.report.version, 1);

        let updated = executor
            .update(tenant_id, quote_id, |root| {
                root.handle(&QuoteCommand::Rename(RenameQuote {
                    name: "Fleet 2027".into(),
                    occurred_at: at(2),
                }))?;
                root.handle(&QuoteCommand::Bind(BindQuote {
                    policy_number: "POL-1".into(),
                    occurred_at: at(3),
                }))?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.root.version(), 3);
        assert_eq!(updated.report.appended, 2);
        assert_eq!(updated.root.state().status, QuoteStatus::Bound);
    }

    #[tokio::test]
    async fn busy_aggregate_fails_fast() {
        let (executor, locks) = executor();
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());
        executor.create_with(tenant_id, quote_id, initialize("Fleet")).await.unwrap();

        let held = locks
            .acquire_lock_or_fail(tenant_id, quote_id, Quote::AGGREGATE_TYPE)
            .await
            .unwrap();
        let err = executor
            .update_with(
                tenant_id,
                quote_id,
                QuoteCommand::Rename(RenameQuote { name: "x".into(), occurred_at: at(2) }),
            )
            .await
            .unwrap_err();
        assert!(err.is_contended());

        held.release().await.unwrap();
        let root = executor.repository().get_by_id(tenant_id, quote_id).await.unwrap();
        assert_eq!(root.version(), 1);
    }

    #[tokio::test]
    async fn rejected_command_releases_the_lock() {
        let (executor, locks) = executor();
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());
        executor.create_with(tenant_id, quote_id, initialize("Fleet")).await.unwrap();

        let err = executor
            .update_with(tenant_id, quote_id, initialize("again"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Rejected(DomainError::AlreadyExists)));

        let lock = locks
            .acquire_lock_or_fail(tenant_id, quote_id, Quote::AGGREGATE_TYPE)
            .await
            .unwrap();
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn create_over_existing_history_conflicts() {
        let (executor, locks) = executor();
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());
        executor.create_with(tenant_id, quote_id, initialize("Fleet")).await.unwrap();

        let err = executor
            .create_with(tenant_id, quote_id, initialize("Fleet"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Repository(RepositoryError::ConcurrencyConflict { expected: 0, actual: 1 })
        ));
        // The rejected append hands the lock back.
        let lock = locks
            .acquire_lock_or_fail(tenant_id, quote_id, Quote::AGGREGATE_TYPE)
            .await
            .unwrap();
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn update_of_unknown_aggregate_is_not_found() {
        let (executor, _) = executor();
        let err = executor
            .update(TenantId::new(), AggregateId::new(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Repository(RepositoryError::NotFound { .. })));
    }
}
