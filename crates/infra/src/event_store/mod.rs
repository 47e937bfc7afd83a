//! Append-only event log boundary.
//!
//! [`EventStore`] is storage-agnostic; [`InMemoryEventStore`] backs tests and
//! local runs, [`PostgresEventStore`] backs deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
