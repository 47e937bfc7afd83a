//! Service assembly: one place that picks backends and wires executors,
//! dispatchers and rebuilders over them.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use policystream_core::Aggregate;
use policystream_events::{DomainEvent, EventDispatcher};
use policystream_identity::{Person, User};
use policystream_quotes::Quote;

use crate::command_executor::CommandExecutor;
use crate::config::{ConfigError, InfraConfig};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use crate::lock::{AggregateLockService, InMemoryLockCoordinator, LockCoordinator, LockError};
use crate::projections::{ProjectionRebuilder, Projections, QuoteSummary};
use crate::read_model::{PostgresTenantStore, ReadModelError};
use crate::repository::AggregateRepository;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("postgres connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("USE_PERSISTENT_STORES=true needs the `redis` feature for aggregate locks")]
    RedisDisabled,
}

pub struct PolicyServices {
    pub event_store: Arc<dyn EventStore>,
    pub locks: AggregateLockService,
    pub projections: Projections,
    pub quotes: CommandExecutor<Quote>,
    pub users: CommandExecutor<User>,
    pub people: CommandExecutor<Person>,
}

impl PolicyServices {
    /// Wire everything over the given backends.
    pub fn assemble(
        event_store: Arc<dyn EventStore>,
        coordinator: Arc<dyn LockCoordinator>,
        projections: Projections,
        config: &InfraConfig,
    ) -> Self {
        let locks = AggregateLockService::new(coordinator)
            .with_ttl(config.lock_ttl())
            .with_prefix(config.lock_prefix.clone());

        let quotes = executor(&event_store, &locks, projections.quote_dispatcher());
        let users = executor(&event_store, &locks, projections.user_dispatcher());
        let people = executor(&event_store, &locks, projections.person_dispatcher());

        Self {
            event_store,
            locks,
            projections,
            quotes,
            users,
            people,
        }
    }

    pub fn in_memory(config: &InfraConfig) -> Self {
        Self::assemble(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryLockCoordinator::new()),
            Projections::in_memory(),
            config,
        )
    }

    /// Postgres + Redis when `use_persistent_stores` is set, in-memory otherwise.
    pub async fn from_config(config: &InfraConfig) -> Result<Self, ServiceError> {
        if !config.use_persistent_stores {
            info!("using in-memory stores");
            return Ok(Self::in_memory(config));
        }

        let database_url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing { var: "DATABASE_URL" })?;
        let pool = PgPool::connect(database_url).await?;

        let event_store = PostgresEventStore::new(pool.clone());
        event_store.migrate().await?;
        PostgresTenantStore::<QuoteSummary>::new(pool.clone()).migrate().await?;

        let coordinator = redis_coordinator(config)?;
        info!(redis_url = %config.redis_url, "using postgres stores and redis locks");

        Ok(Self::assemble(
            Arc::new(event_store),
            coordinator,
            Projections::postgres(pool),
            config,
        ))
    }

    pub fn quote_rebuilder(&self) -> ProjectionRebuilder<Quote> {
        rebuilder(&self.event_store, &self.quotes)
    }

    pub fn user_rebuilder(&self) -> ProjectionRebuilder<User> {
        rebuilder(&self.event_store, &self.users)
    }

    pub fn person_rebuilder(&self) -> ProjectionRebuilder<Person> {
        rebuilder(&self.event_store, &self.people)
    }
}

fn executor<A>(
    store: &Arc<dyn EventStore>,
    locks: &AggregateLockService,
    dispatcher: EventDispatcher<A>,
) -> CommandExecutor<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    let repository = AggregateRepository::new(Arc::clone(store), Arc::new(dispatcher));
    CommandExecutor::new(locks.clone(), repository)
}

fn rebuilder<A>(store: &Arc<dyn EventStore>, executor: &CommandExecutor<A>) -> ProjectionRebuilder<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    ProjectionRebuilder::new(
        Arc::clone(store),
        Arc::clone(executor.repository().dispatcher()),
        executor.locks().clone(),
    )
}

#[cfg(feature = "redis")]
fn redis_coordinator(config: &InfraConfig) -> Result<Arc<dyn LockCoordinator>, ServiceError> {
    Ok(Arc::new(crate::lock::RedisLockCoordinator::new(&config.redis_url)?))
}

#[cfg(not(feature = "redis"))]
fn redis_coordinator(_config: &InfraConfig) -> Result<Arc<dyn LockCoordinator>, ServiceError> {
    Err(ServiceError::RedisDisabled)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use policystream_core::{AggregateId, TenantId};
    use policystream_quotes::{InitializeQuote, QuoteCommand};

    use super::*;

    #[tokio::test]
    async fn in_memory_services_project_quotes() {
        let config = InfraConfig::default();
        let services = PolicyServices::from_config(&config).await.unwrap();
        let (tenant_id, quote_id) = (TenantId::new(), AggregateId::new());

        services
            .quotes
            .create_with(
                tenant_id,
                quote_id,
                QuoteCommand::Initialize(InitializeQuote {
                    name: "Travel".into(),
                    product_code: "trv".into(),
                    premium_cents: 2_500,
                    occurred_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
                }),
            )
            .await
            .unwrap();

        let row = services
            .projections
            .quote_summaries
            .get(tenant_id, quote_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.product_code, "TRV");
        assert_eq!(services.locks.ttl(), config.lock_ttl());
    }
}
