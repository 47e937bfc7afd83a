//! Quote aggregate: the unit of quoting work before it becomes a policy.

pub mod quote;

pub use quote::{
    BindQuote, CancelQuote, InitializeQuote, Quote, QuoteBound, QuoteCancelled, QuoteCommand,
    QuoteEvent, QuoteEventKind, QuoteInitialized, QuoteRenamed, QuoteStatus, RenameQuote,
};
