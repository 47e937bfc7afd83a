//! Event-sourcing mechanics: events, envelopes, the aggregate wrapper and
//! the observer dispatcher. No storage assumptions.

pub mod dispatcher;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod root;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatchError, DispatchReport, EventDispatcher};
pub use envelope::EventEnvelope;
pub use event::DomainEvent;
pub use handler::{
    HandlerContext, HandlerFn, HandlerFuture, HandlerResult, Observer, ObserverHandlers,
    ProjectedRow,
};
pub use root::{AggregateRoot, StreamError};
