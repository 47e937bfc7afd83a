use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use policystream_core::{AggregateId, ExpectedVersion, TenantId};
use policystream_events::{DomainEvent, EventEnvelope};
use std::sync::Arc;

/// An event recorded by an aggregate, serialized and ready to append.
///
/// The aggregate has already numbered it (`version + n`); the store only
/// verifies that the numbering continues the stream without a gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed envelope recorded by an `AggregateRoot`.
    pub fn from_envelope<E>(envelope: &EventEnvelope<E>) -> Result<Self, EventStoreError>
    where
        E: DomainEvent,
    {
        let payload = serde_json::to_value(envelope.payload())
            .map_err(|e| EventStoreError::Serialization(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id: envelope.event_id(),
            tenant_id: envelope.tenant_id(),
            aggregate_id: envelope.aggregate_id(),
            aggregate_type: envelope.aggregate_type().to_string(),
            sequence_number: envelope.sequence_number(),
            event_type: envelope.event_type().to_string(),
            event_version: envelope.payload().version(),
            occurred_at: envelope.timestamp(),
            payload,
        })
    }
}

/// A persisted event.
///
/// Sequence numbers are 1-based, contiguous and immutable within one
/// `(tenant_id, aggregate_id)` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    /// Wall-clock time the store accepted the event. Not part of aggregate state.
    pub recorded_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode the JSON payload back into the aggregate's event type.
    pub fn decode<E>(&self) -> Result<EventEnvelope<E>, EventStoreError>
    where
        E: DomainEvent,
    {
        let payload: E = serde_json::from_value(self.payload.clone()).map_err(|e| {
            EventStoreError::Serialization(format!(
                "cannot decode {} (sequence {}): {e}",
                self.event_type, self.sequence_number
            ))
        })?;

        Ok(EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.occurred_at,
            payload,
        ))
    }
}

/// Event store operation error.
///
/// Infrastructure failures only; business rejections never reach the store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream is not at the version the caller expected.
    #[error("optimistic concurrency check failed: expected {expected:?}, found {actual}")]
    Concurrency { expected: ExpectedVersion, actual: u64 },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

/// Append-only, tenant-scoped event log.
///
/// Streams are keyed by `(tenant_id, aggregate_id)` and belong to exactly one
/// aggregate type, so each aggregate type is logically its own log.
///
/// `append` must:
/// - reject batches that mix tenants, aggregates or aggregate types
/// - compare the stream version with `expected_version` and write nothing on mismatch
/// - require the batch to continue the stream (`current + 1, current + 2, ...`)
/// - persist the whole batch or none of it
///
/// `load_stream` returns events in ascending sequence order, or an empty
/// vector for an unknown stream.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Ids of every stream of `aggregate_type` owned by `tenant_id`.
    async fn aggregate_ids(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version).await
    }

    async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, aggregate_type, aggregate_id).await
    }

    async fn aggregate_ids(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
    ) -> Result<Vec<AggregateId>, EventStoreError> {
        (**self).aggregate_ids(tenant_id, aggregate_type).await
    }
}

/// Batch checks shared by every backend: one tenant, one aggregate, one
/// aggregate type, and sequence numbers that run `first, first + 1, ...`.
///
/// Returns `(tenant_id, aggregate_id, aggregate_type, first_sequence)`.
pub(crate) fn validate_batch(
    events: &[UncommittedEvent],
) -> Result<(TenantId, AggregateId, String, u64), EventStoreError> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;

    for (idx, e) in events.iter().enumerate() {
        if e.tenant_id != first.tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple tenant_ids (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
        if e.sequence_number != first.sequence_number + idx as u64 {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch sequence numbers are not contiguous at index {idx}"
            )));
        }
    }

    Ok((
        first.tenant_id,
        first.aggregate_id,
        first.aggregate_type.clone(),
        first.sequence_number,
    ))
}
