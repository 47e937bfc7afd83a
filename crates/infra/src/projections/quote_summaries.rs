//! Quote summary projection: one row per quote for list/search screens.

use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use policystream_core::{AggregateId, TenantId};
use policystream_events::{
    AggregateRoot, EventEnvelope, HandlerContext, HandlerFuture, HandlerResult, ObserverHandlers,
};
use policystream_quotes::{Quote, QuoteEvent, QuoteEventKind, QuoteStatus};

use crate::read_model::{ReadModel, TenantStore};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSummary {
    pub tenant_id: TenantId,
    pub quote_id: AggregateId,
    pub name: String,
    pub product_code: String,
    pub premium_cents: i64,
    pub status: QuoteStatus,
    pub policy_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last event applied to this row.
    pub last_modified_at: DateTime<Utc>,
    /// Sequence number of the last event applied to this row.
    pub last_sequence_number: u64,
}

impl ReadModel for QuoteSummary {
    const PROJECTION: &'static str = "quote_summaries";
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

pub struct QuoteSummaryWriter<S> {
    store: S,
}

impl<S> QuoteSummaryWriter<S>
where
    S: TenantStore<QuoteSummary> + 'static,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn handlers(self: Arc<Self>) -> ObserverHandlers<Self, Quote> {
        ObserverHandlers::new(QuoteSummary::PROJECTION, self)
            .on(QuoteEventKind::Initialized, Self::on_initialized)
            .on(QuoteEventKind::Renamed, Self::on_changed)
            .on(QuoteEventKind::Bound, Self::on_changed)
            .on(QuoteEventKind::Cancelled, Self::on_changed)
    }

    fn on_initialized<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        quote: &'a AggregateRoot<Quote>,
        event: &'a EventEnvelope<QuoteEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.initialized(ctx, quote, event))
    }

    fn on_changed<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        _quote: &'a AggregateRoot<Quote>,
        event: &'a EventEnvelope<QuoteEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.changed(ctx, event))
    }

    async fn initialized(
        &self,
        ctx: &mut HandlerContext,
        quote: &AggregateRoot<Quote>,
        event: &EventEnvelope<QuoteEvent>,
    ) -> HandlerResult {
        let QuoteEvent::Initialized(e) = event.payload() else {
            bail!("expected quote.initialized, got {}", event.event_type());
        };
        let (tenant_id, quote_id) = (event.tenant_id(), event.aggregate_id());

        if quote.is_replaying() && self.store.delete(tenant_id, quote_id.into()).await? {
            debug!(%quote_id, "replaying: dropped existing quote summary");
        }

        let row = QuoteSummary {
            tenant_id,
            quote_id,
            name: e.name.clone(),
            product_code: e.product_code.clone(),
            premium_cents: e.premium_cents,
            status: QuoteStatus::Draft,
            policy_number: None,
            cancellation_reason: None,
            created_at: event.timestamp(),
            last_modified_at: event.timestamp(),
            last_sequence_number: event.sequence_number(),
        };
        self.store.upsert(tenant_id, quote_id.into(), row).await?;
        ctx.projected(QuoteSummary::PROJECTION, tenant_id, quote_id);
        Ok(())
    }

    async fn changed(&self, ctx: &mut HandlerContext, event: &EventEnvelope<QuoteEvent>) -> HandlerResult {
        let (tenant_id, quote_id) = (event.tenant_id(), event.aggregate_id());

        let Some(mut row) = self.store.get(tenant_id, quote_id.into()).await? else {
            return Ok(());
        };
        // Already applied (redispatch after a partial failure).
        if row.last_sequence_number >= event.sequence_number() {
            return Ok(());
        }

        match event.payload() {
            QuoteEvent::Renamed(e) => row.name = e.name.clone(),
            QuoteEvent::Bound(e) => {
                row.status = QuoteStatus::Bound;
                row.policy_number = Some(e.policy_number.clone());
            }
            QuoteEvent::Cancelled(e) => {
                row.status = QuoteStatus::Cancelled;
                row.cancellation_reason = Some(e.reason.clone());
            }
            QuoteEvent::Initialized(_) => bail!("quote.initialized routed to update handler"),
        }
        row.last_modified_at = event.timestamp();
        row.last_sequence_number = event.sequence_number();

        self.store.upsert(tenant_id, quote_id.into(), row).await?;
        ctx.projected(QuoteSummary::PROJECTION, tenant_id, quote_id);
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId, quote_id: AggregateId) -> anyhow::Result<Option<QuoteSummary>> {
        Ok(self.store.get(tenant_id, quote_id.into()).await?)
    }

    pub async fn list(&self, tenant_id: TenantId) -> anyhow::Result<Vec<QuoteSummary>> {
        Ok(self.store.list(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use policystream_events::EventDispatcher;
    use policystream_quotes::{InitializeQuote, QuoteCommand, RenameQuote};

    use super::*;
    use crate::read_model::InMemoryTenantStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    type Writer = QuoteSummaryWriter<Arc<InMemoryTenantStore<QuoteSummary>>>;

    fn setup() -> (Arc<Writer>, EventDispatcher<Quote>) {
        let writer = Arc::new(QuoteSummaryWriter::new(Arc::new(InMemoryTenantStore::new())));
        let dispatcher = EventDispatcher::new().with(Arc::clone(&writer).handlers());
        (writer, dispatcher)
    }

    fn initialized_and_renamed() -> (AggregateRoot<Quote>, Vec<EventEnvelope<QuoteEvent>>) {
        let mut quote = AggregateRoot::<Quote>::new(TenantId::new(), AggregateId::new());
        quote
            .handle(&QuoteCommand::Initialize(InitializeQuote {
                name: "Home cover".into(),
                product_code: "home".into(),
                premium_cents: 12_000,
                occurred_at: at(1),
            }))
            .unwrap();
        quote
            .handle(&QuoteCommand::Rename(RenameQuote {
                name: "Home cover plus".into(),
                occurred_at: at(2),
            }))
            .unwrap();
        let events = quote.commit();
        (quote, events)
    }

    #[tokio::test]
    async fn summary_tracks_latest_event() {
        let (writer, dispatcher) = setup();
        let (quote, events) = initialized_and_renamed();

        dispatcher.dispatch_all(&quote, &events).await.unwrap();

        let row = writer.get(quote.tenant_id(), quote.id()).await.unwrap().unwrap();
        assert_eq!(row.name, "Home cover plus");
        assert_eq!(row.product_code, "HOME");
        assert_eq!(row.created_at, at(1));
        assert_eq!(row.last_modified_at, at(2));
        assert_eq!(row.last_sequence_number, 2);
    }

    #[tokio::test]
    async fn update_for_missing_row_is_a_no_op() {
        let (writer, dispatcher) = setup();
        let (quote, events) = initialized_and_renamed();

        dispatcher.dispatch(&quote, &events[1]).await.unwrap();

        assert!(writer.get(quote.tenant_id(), quote.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivered_update_is_skipped() {
        let (writer, dispatcher) = setup();
        let (quote, events) = initialized_and_renamed();
        dispatcher.dispatch_all(&quote, &events).await.unwrap();

        let report = dispatcher.dispatch(&quote, &events[1]).await.unwrap();

        assert!(report.projected.is_empty());
        let rows = writer.list(quote.tenant_id()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].last_sequence_number, 2);
    }

    #[tokio::test]
    async fn replayed_initialization_replaces_stale_row() {
        let (writer, dispatcher) = setup();
        let (quote, events) = initialized_and_renamed();
        dispatcher.dispatch_all(&quote, &events).await.unwrap();

        let mut replayed = AggregateRoot::<Quote>::new(quote.tenant_id(), quote.id());
        replayed.begin_replay().unwrap();
        replayed.replay_event(&events[0]).unwrap();
        dispatcher.dispatch(&replayed, &events[0]).await.unwrap();

        let row = writer.get(quote.tenant_id(), quote.id()).await.unwrap().unwrap();
        assert_eq!(row.name, "Home cover");
        assert_eq!(row.last_sequence_number, 1);
    }
}
