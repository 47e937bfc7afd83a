//! Tenant-isolated read model storage.
//!
//! Read models are disposable: every row can be rebuilt from the event log.
//! Each projection owns exactly one [`TenantStore`]; other writers may read
//! it as a lookup source but never write to it.

pub mod postgres;
pub mod tenant_store;

pub use postgres::PostgresTenantStore;
pub use tenant_store::{InMemoryTenantStore, ReadModel, ReadModelError, TenantStore};
