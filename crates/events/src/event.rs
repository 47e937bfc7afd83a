use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// A domain event payload: the kind-specific fields of an immutable fact.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **tagged** with a fieldless `Kind`, which is what observers register against
/// - designed to be **append-only**
///
/// Stream metadata (tenant, aggregate, sequence number, timestamp) lives in
/// [`EventEnvelope`](crate::EventEnvelope), not here.
pub trait DomainEvent:
    Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Discriminant of the payload enum, used as the handler registry key.
    type Kind: Copy + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Stable event name (e.g. "quote.renamed"), persisted next to the payload.
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// When the event occurred (business time). Becomes the envelope timestamp.
    fn occurred_at(&self) -> DateTime<Utc>;
}
