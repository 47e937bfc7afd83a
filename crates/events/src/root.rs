//! Event-sourced aggregate wrapper.
//!
//! [`AggregateRoot`] owns everything that is not domain state: identity,
//! tenant, the persisted version, the uncommitted buffer and the replaying
//! flag. Domain state only ever changes through [`Aggregate::apply`], called
//! from here.

use thiserror::Error;
use uuid::Uuid;

use policystream_core::{Aggregate, AggregateId, TenantId};

use crate::{DomainEvent, EventEnvelope};

/// A loaded history could not be folded into an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("event {event_id} belongs to tenant {found}, expected {expected}")]
    TenantMismatch {
        event_id: Uuid,
        expected: TenantId,
        found: TenantId,
    },

    #[error("event {event_id} belongs to aggregate {found}, expected {expected}")]
    AggregateMismatch {
        event_id: Uuid,
        expected: AggregateId,
        found: AggregateId,
    },

    #[error("non-contiguous sequence number (expected {expected}, found {found})")]
    Gap { expected: u64, found: u64 },

    #[error("cannot replay while {pending} uncommitted events are buffered")]
    PendingChanges { pending: usize },
}

/// An aggregate instance plus its event-sourcing bookkeeping.
///
/// # Invariants
/// - `state` is exactly the left fold of `apply` over the persisted history
///   followed by the uncommitted buffer.
/// - `version` equals the last persisted sequence number (0 for a new aggregate).
/// - uncommitted events are numbered `version + 1 ..= version + n` with no gaps.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    tenant_id: TenantId,
    version: u64,
    replaying: bool,
    uncommitted: Vec<EventEnvelope<A::Event>>,
    state: A,
}

impl<A> AggregateRoot<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    /// A brand-new aggregate with no history.
    pub fn new(tenant_id: TenantId, id: AggregateId) -> Self {
        Self {
            id,
            tenant_id,
            version: 0,
            replaying: false,
            uncommitted: Vec::new(),
            state: A::default(),
        }
    }

    /// Reconstruct an aggregate by replaying its history in order.
    ///
    /// `replaying` is `true` for the duration of the fold and `false` on return.
    pub fn rehydrate<I>(tenant_id: TenantId, id: AggregateId, history: I) -> Result<Self, StreamError>
    where
        I: IntoIterator<Item = EventEnvelope<A::Event>>,
    {
        let mut root = Self::new(tenant_id, id);
        root.begin_replay()?;
        for event in history {
            root.replay_event(&event)?;
        }
        root.end_replay();
        Ok(root)
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Number of persisted events (= last persisted sequence number).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn aggregate_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// `true` while history is being re-applied (load or projection rebuild).
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn uncommitted_events(&self) -> &[EventEnvelope<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Sequence number the next recorded event will receive.
    pub fn next_sequence_number(&self) -> u64 {
        self.version + self.uncommitted.len() as u64 + 1
    }

    /// Run a business operation against the current state.
    ///
    /// On success every emitted event is numbered, applied immediately and
    /// buffered, so a later command in the same unit of work sees it. On
    /// rejection nothing is recorded.
    pub fn handle(&mut self, command: &A::Command) -> Result<&[EventEnvelope<A::Event>], A::Error> {
        let decided = self.state.handle(command)?;
        let first = self.uncommitted.len();
        for payload in decided {
            self.record(payload);
        }
        Ok(&self.uncommitted[first..])
    }

    fn record(&mut self, payload: A::Event) {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            self.tenant_id,
            self.id,
            A::AGGREGATE_TYPE,
            self.next_sequence_number(),
            payload.occurred_at(),
            payload,
        );
        self.state.apply(envelope.payload());
        self.uncommitted.push(envelope);
    }

    /// Enter replay mode. Fails if live changes are still buffered.
    pub fn begin_replay(&mut self) -> Result<(), StreamError> {
        if !self.uncommitted.is_empty() {
            return Err(StreamError::PendingChanges {
                pending: self.uncommitted.len(),
            });
        }
        self.replaying = true;
        Ok(())
    }

    /// Apply one already-persisted event. It must be the next in sequence.
    pub fn replay_event(&mut self, event: &EventEnvelope<A::Event>) -> Result<(), StreamError> {
        if event.tenant_id() != self.tenant_id {
            return Err(StreamError::TenantMismatch {
                event_id: event.event_id(),
                expected: self.tenant_id,
                found: event.tenant_id(),
            });
        }
        if event.aggregate_id() != self.id {
            return Err(StreamError::AggregateMismatch {
                event_id: event.event_id(),
                expected: self.id,
                found: event.aggregate_id(),
            });
        }
        let expected = self.version + 1;
        if event.sequence_number() != expected {
            return Err(StreamError::Gap {
                expected,
                found: event.sequence_number(),
            });
        }

        self.state.apply(event.payload());
        self.version = expected;
        Ok(())
    }

    pub fn end_replay(&mut self) {
        self.replaying = false;
    }

    /// Mark the buffered events as persisted: drains the buffer and advances
    /// `version` past them. Called by the repository once the append commits.
    pub fn commit(&mut self) -> Vec<EventEnvelope<A::Event>> {
        let committed = std::mem::take(&mut self.uncommitted);
        if let Some(last) = committed.last() {
            self.version = last.sequence_number();
        }
        committed
    }
}
