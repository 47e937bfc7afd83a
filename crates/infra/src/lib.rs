//! Infrastructure layer: event log, repository, locks, read models and the
//! wiring that ties them to the domain crates.

pub mod command_executor;
pub mod config;
pub mod event_store;
pub mod lock;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod services;

pub use command_executor::{CommandError, CommandExecutor, CommandOutcome};
pub use config::{ConfigError, InfraConfig};
pub use repository::{AggregateRepository, RepositoryError, SaveReport};
pub use services::{PolicyServices, ServiceError};
