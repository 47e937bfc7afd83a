//! Read-model writers and their wiring.
//!
//! Every writer is:
//! - **Rebuildable**: delete-then-recreate on the initializing event when replaying
//! - **Tenant-isolated**: rows are keyed by `(tenant_id, id)`
//! - **Tolerant**: an update for a row that does not exist yet is a no-op

pub mod person_directory;
pub mod quote_summaries;
pub mod rebuild;
pub mod user_directory;

use std::sync::Arc;

use sqlx::PgPool;

use policystream_events::EventDispatcher;
use policystream_identity::{Person, User};
use policystream_quotes::Quote;

use crate::read_model::{InMemoryTenantStore, PostgresTenantStore, TenantStore};

pub use person_directory::{PersonDirectoryEntry, PersonDirectoryWriter};
pub use quote_summaries::{QuoteSummary, QuoteSummaryWriter};
pub use rebuild::{ProjectionRebuilder, RebuildError, RebuildHandle, RebuildReport};
pub use user_directory::{UserDirectoryEntry, UserDirectoryWriter};

pub type QuoteSummaryStore = Arc<dyn TenantStore<QuoteSummary>>;
pub type UserDirectoryStore = Arc<dyn TenantStore<UserDirectoryEntry>>;
pub type PersonDirectoryStore = Arc<dyn TenantStore<PersonDirectoryEntry>>;

/// The writers, built once at start-up over a set of read model stores.
pub struct Projections {
    pub quote_summaries: Arc<QuoteSummaryWriter<QuoteSummaryStore>>,
    pub person_directory: Arc<PersonDirectoryWriter<PersonDirectoryStore>>,
    pub user_directory: Arc<UserDirectoryWriter<UserDirectoryStore, PersonDirectoryStore>>,
}

impl Projections {
    pub fn new(quotes: QuoteSummaryStore, users: UserDirectoryStore, people: PersonDirectoryStore) -> Self {
        Self {
            quote_summaries: Arc::new(QuoteSummaryWriter::new(quotes)),
            person_directory: Arc::new(PersonDirectoryWriter::new(Arc::clone(&people))),
            user_directory: Arc::new(UserDirectoryWriter::new(users, people)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
        )
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PostgresTenantStore::new(pool.clone())),
            Arc::new(PostgresTenantStore::new(pool.clone())),
            Arc::new(PostgresTenantStore::new(pool)),
        )
    }

    pub fn quote_dispatcher(&self) -> EventDispatcher<Quote> {
        EventDispatcher::new().with(Arc::clone(&self.quote_summaries).handlers())
    }

    pub fn user_dispatcher(&self) -> EventDispatcher<User> {
        EventDispatcher::new().with(Arc::clone(&self.user_directory).user_handlers())
    }

    /// The person directory runs before the user fan-out.
    pub fn person_dispatcher(&self) -> EventDispatcher<Person> {
        EventDispatcher::new()
            .with(Arc::clone(&self.person_directory).handlers())
            .with(Arc::clone(&self.user_directory).person_handlers())
    }
}
