//! Aggregate trait for event-sourced domain models.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, administrative tooling).
    Any,
    /// Require the stream to be at an exact version (last persisted sequence number).
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate state semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` validates a command against the
///   current state and returns the events describing what happened.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// The implementing type holds only the domain fields. Identity, tenant,
/// version and the uncommitted buffer are tracked by the event-sourcing
/// wrapper in `policystream-events`, which is the only caller of `apply`.
///
/// Aggregates must not perform IO, read the clock or use randomness. Any
/// timestamp they need arrives inside the command or the event.
pub trait Aggregate: Default + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable aggregate type identifier (e.g. "quote"). Scopes event streams and locks.
    const AGGREGATE_TYPE: &'static str;

    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// A rejected command returns `Err` and must not emit anything.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
