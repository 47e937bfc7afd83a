//! Per-kind event handlers for read-model writers.
//!
//! A writer exposes one method per event kind it cares about and registers
//! them at start-up in an [`ObserverHandlers`] table keyed by the event's
//! `Kind`. Kinds without an entry are skipped by the dispatcher; there is no
//! runtime type inspection.
//!
//! ```ignore
//! let handlers = ObserverHandlers::new("quote_summary", writer)
//!     .on(QuoteEventKind::Initialized, QuoteSummaryWriter::on_initialized)
//!     .on(QuoteEventKind::Renamed, QuoteSummaryWriter::on_renamed);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use policystream_core::{Aggregate, TenantId};

use crate::{AggregateRoot, DomainEvent, EventEnvelope};

/// Writer handlers report failures with `anyhow`; the dispatcher adds the
/// observer name and sequence number.
pub type HandlerResult = anyhow::Result<()>;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// Signature of a per-kind handler method on writer `W` for aggregate `A`.
pub type HandlerFn<W, A> = for<'a> fn(
    &'a W,
    &'a mut HandlerContext,
    &'a AggregateRoot<A>,
    &'a EventEnvelope<<A as Aggregate>::Event>,
) -> HandlerFuture<'a>;

/// A read-model row touched while handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedRow {
    pub projection: &'static str,
    pub tenant_id: TenantId,
    pub id: Uuid,
}

/// Per-event accumulator handed to every handler.
///
/// Handlers report what they wrote through [`HandlerContext::projected`]
/// instead of stashing it on the aggregate.
#[derive(Debug)]
pub struct HandlerContext {
    sequence_number: u64,
    projected: Vec<ProjectedRow>,
}

impl HandlerContext {
    pub fn new(sequence_number: u64) -> Self {
        Self {
            sequence_number,
            projected: Vec::new(),
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Record that `projection` row `id` was created, updated or deleted.
    pub fn projected(&mut self, projection: &'static str, tenant_id: TenantId, id: impl Into<Uuid>) {
        self.projected.push(ProjectedRow {
            projection,
            tenant_id,
            id: id.into(),
        });
    }

    pub fn rows(&self) -> &[ProjectedRow] {
        &self.projected
    }

    pub fn into_rows(self) -> Vec<ProjectedRow> {
        self.projected
    }
}

/// Handler table for one writer against one aggregate type.
///
/// A writer that reacts to two aggregate types builds two tables, one per
/// aggregate type, and registers each with that type's dispatcher.
pub struct ObserverHandlers<W, A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    name: &'static str,
    writer: Arc<W>,
    handlers: HashMap<<A::Event as DomainEvent>::Kind, HandlerFn<W, A>>,
}

impl<W, A> ObserverHandlers<W, A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    pub fn new(name: &'static str, writer: Arc<W>) -> Self {
        Self {
            name,
            writer,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`. Registering a kind twice keeps the later handler.
    pub fn on(mut self, kind: <A::Event as DomainEvent>::Kind, handler: HandlerFn<W, A>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handles(&self, kind: <A::Event as DomainEvent>::Kind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn writer(&self) -> &Arc<W> {
        &self.writer
    }
}

/// Object-safe view of an [`ObserverHandlers`] table, so one dispatcher can
/// hold writers of different concrete types.
pub trait Observer<A>: Send + Sync
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    fn name(&self) -> &'static str;

    fn handles(&self, kind: <A::Event as DomainEvent>::Kind) -> bool;

    /// Start the handler registered for this event's kind, or `None` if the
    /// writer does not care about it.
    fn invoke<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        aggregate: &'a AggregateRoot<A>,
        event: &'a EventEnvelope<A::Event>,
    ) -> Option<HandlerFuture<'a>>;
}

impl<W, A> Observer<A> for ObserverHandlers<W, A>
where
    W: Send + Sync + 'static,
    A: Aggregate,
    A::Event: DomainEvent,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handles(&self, kind: <A::Event as DomainEvent>::Kind) -> bool {
        self.handlers.contains_key(&kind)
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        aggregate: &'a AggregateRoot<A>,
        event: &'a EventEnvelope<A::Event>,
    ) -> Option<HandlerFuture<'a>> {
        let handler = self.handlers.get(&event.kind())?;
        Some(handler(self.writer.as_ref(), ctx, aggregate, event))
    }
}
