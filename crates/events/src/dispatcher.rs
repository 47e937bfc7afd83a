//! Fan-out of committed events to read-model writers.
//!
//! The dispatcher holds an ordered list of observers for one aggregate type.
//! For each event it walks the list in registration order and invokes every
//! observer that registered a handler for the event's kind. Observers without
//! a handler are skipped.
//!
//! The first failing handler aborts dispatch of that event (later observers
//! are not invoked) and the error propagates to the caller. Nothing is
//! swallowed here: a dropped projection update would leave the read model
//! permanently behind the log.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use policystream_core::Aggregate;

use crate::handler::{HandlerContext, Observer, ProjectedRow};
use crate::{AggregateRoot, DomainEvent, EventEnvelope};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("observer `{observer}` failed on {event_type} (sequence {sequence_number}): {error:#}")]
    Observer {
        observer: &'static str,
        event_type: &'static str,
        sequence_number: u64,
        error: anyhow::Error,
    },

    #[error("events must be dispatched in sequence order (last {last}, found {found})")]
    OutOfOrder { last: u64, found: u64 },
}

impl DispatchError {
    /// Sequence number of the event whose dispatch failed, when known.
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            DispatchError::Observer { sequence_number, .. } => Some(*sequence_number),
            DispatchError::OutOfOrder { found, .. } => Some(*found),
        }
    }
}

/// What happened while dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sequence_number: u64,
    /// Observers whose handler ran, in invocation order.
    pub invoked: Vec<&'static str>,
    /// Observers skipped because they have no handler for this kind.
    pub skipped: Vec<&'static str>,
    pub projected: Vec<ProjectedRow>,
}

/// Observer registry + dispatcher for aggregate type `A`.
///
/// Populate it once at start-up; registration order is invocation order.
pub struct EventDispatcher<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    observers: Vec<Arc<dyn Observer<A>>>,
}

impl<A> Default for EventDispatcher<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<A> core::fmt::Debug for EventDispatcher<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .field("observers", &self.observer_names())
            .finish()
    }
}

impl<A> EventDispatcher<A>
where
    A: Aggregate,
    A::Event: DomainEvent,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: impl Observer<A> + 'static) -> &mut Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, observer: impl Observer<A> + 'static) -> Self {
        self.register(observer);
        self
    }

    pub fn observer_names(&self) -> Vec<&'static str> {
        self.observers.iter().map(|o| o.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Invoke every observer that handles `event`'s kind, in registration order.
    #[instrument(
        skip(self, aggregate, event),
        fields(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %event.aggregate_id(),
            sequence_number = event.sequence_number(),
            event_type = event.event_type(),
        ),
        err
    )]
    pub async fn dispatch(
        &self,
        aggregate: &AggregateRoot<A>,
        event: &EventEnvelope<A::Event>,
    ) -> Result<DispatchReport, DispatchError> {
        let sequence_number = event.sequence_number();
        let mut ctx = HandlerContext::new(sequence_number);
        let mut report = DispatchReport {
            sequence_number,
            ..DispatchReport::default()
        };

        for observer in &self.observers {
            let Some(handling) = observer.invoke(&mut ctx, aggregate, event) else {
                report.skipped.push(observer.name());
                continue;
            };

            handling.await.map_err(|error| DispatchError::Observer {
                observer: observer.name(),
                event_type: event.event_type(),
                sequence_number,
                error,
            })?;

            debug!(observer = observer.name(), "event handled");
            report.invoked.push(observer.name());
        }

        report.projected = ctx.into_rows();
        Ok(report)
    }

    /// Dispatch a batch for one aggregate, strictly in sequence order.
    ///
    /// Stops at the first failure; events after it are not dispatched.
    pub async fn dispatch_all(
        &self,
        aggregate: &AggregateRoot<A>,
        events: &[EventEnvelope<A::Event>],
    ) -> Result<Vec<DispatchReport>, DispatchError> {
        let mut reports = Vec::with_capacity(events.len());
        let mut last = 0u64;
        for event in events {
            if event.sequence_number() <= last {
                return Err(DispatchError::OutOfOrder {
                    last,
                    found: event.sequence_number(),
                });
            }
            last = event.sequence_number();
            reports.push(self.dispatch(aggregate, event).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use policystream_core::{AggregateId, TenantId};

    use super::*;
    use crate::handler::{HandlerFuture, ObserverHandlers};
    use crate::testing::{Note, NoteCommand, NoteEventKind, at};

    /// Records (observer, sequence) pairs in invocation order.
    #[derive(Default)]
    struct Recorder {
        label: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, u64)>>>,
        fail_on: Option<u64>,
    }

    impl Recorder {
        fn on_any<'a>(
            &'a self,
            ctx: &'a mut HandlerContext,
            note: &'a AggregateRoot<Note>,
            event: &'a EventEnvelope<crate::testing::NoteEvent>,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                if self.fail_on == Some(event.sequence_number()) {
                    anyhow::bail!("simulated projection failure");
                }
                self.seen.lock().unwrap().push((self.label, ctx.sequence_number()));
                ctx.projected(self.label, note.tenant_id(), *note.id().as_uuid());
                Ok(())
            })
        }
    }

    fn note_with_two_events() -> (AggregateRoot<Note>, Vec<EventEnvelope<crate::testing::NoteEvent>>) {
        let mut note = AggregateRoot::<Note>::new(TenantId::new(), AggregateId::new());
        note.handle(&NoteCommand::Create { title: "a".into(), at: at(1) }).unwrap();
        note.handle(&NoteCommand::Retitle { title: "b".into(), at: at(2) }).unwrap();
        let events = note.commit();
        (note, events)
    }

    fn recorder(
        label: &'static str,
        seen: &Arc<Mutex<Vec<(&'static str, u64)>>>,
        fail_on: Option<u64>,
        kinds: &[NoteEventKind],
    ) -> ObserverHandlers<Recorder, Note> {
        let writer = Arc::new(Recorder {
            label,
            seen: seen.clone(),
            fail_on,
        });
        kinds
            .iter()
            .fold(ObserverHandlers::new(label, writer), |h, kind| h.on(*kind, Recorder::on_any))
    }

    #[tokio::test]
    async fn dispatches_in_registration_and_sequence_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let all = [NoteEventKind::Created, NoteEventKind::Retitled];
        let dispatcher = EventDispatcher::<Note>::new()
            .with(recorder("first", &seen, None, &all))
            .with(recorder("second", &seen, None, &all));

        let (note, events) = note_with_two_events();
        let reports = dispatcher.dispatch_all(&note, &events).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
        assert_eq!(reports[1].invoked, vec!["first", "second"]);
        assert_eq!(reports[0].projected.len(), 2);
    }

    #[tokio::test]
    async fn unhandled_kinds_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::<Note>::new()
            .with(recorder("creations", &seen, None, &[NoteEventKind::Created]));

        let (note, events) = note_with_two_events();
        let reports = dispatcher.dispatch_all(&note, &events).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![("creations", 1)]);
        assert_eq!(reports[1].skipped, vec!["creations"]);
        assert!(reports[1].invoked.is_empty());
    }

    #[tokio::test]
    async fn failure_stops_later_observers_and_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let all = [NoteEventKind::Created, NoteEventKind::Retitled];
        let dispatcher = EventDispatcher::<Note>::new()
            .with(recorder("broken", &seen, Some(1), &all))
            .with(recorder("after", &seen, None, &all));

        let (note, events) = note_with_two_events();
        let err = dispatcher.dispatch_all(&note, &events).await.unwrap_err();

        assert!(matches!(err, DispatchError::Observer { observer: "broken", sequence_number: 1, .. }));
        assert_eq!(err.sequence_number(), Some(1));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_order_batch_is_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::<Note>::new()
            .with(recorder("r", &seen, None, &[NoteEventKind::Created]));

        let (note, mut events) = note_with_two_events();
        events.reverse();

        let err = dispatcher.dispatch_all(&note, &events).await.unwrap_err();
        assert!(matches!(err, DispatchError::OutOfOrder { last: 2, found: 1 }));
    }
}
