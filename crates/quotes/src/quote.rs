use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use policystream_core::{Aggregate, DomainError};
use policystream_events::DomainEvent;

/// Quote lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Bound,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Bound => "bound",
            QuoteStatus::Cancelled => "cancelled",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate state
// ─────────────────────────────────────────────────────────────────────────────

/// Quote state, derived purely from its events.
///
/// # Invariants
/// - `name` is never empty once initialized.
/// - A bound quote has a policy number; bound and cancelled quotes are terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quote {
    pub initialized: bool,
    pub name: String,
    pub product_code: String,
    pub premium_cents: i64,
    pub status: QuoteStatus,
    pub policy_number: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Quote {
    fn ensure_initialized(&self) -> Result<(), DomainError> {
        if !self.initialized {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        match self.status {
            QuoteStatus::Draft => Ok(()),
            other => Err(DomainError::precondition(format!("quote is {}", other.as_str()))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeQuote {
    pub name: String,
    pub product_code: String,
    pub premium_cents: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameQuote {
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindQuote {
    pub policy_number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelQuote {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuoteCommand {
    Initialize(InitializeQuote),
    Rename(RenameQuote),
    Bind(BindQuote),
    Cancel(CancelQuote),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteInitialized {
    pub name: String,
    pub product_code: String,
    pub premium_cents: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRenamed {
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteBound {
    pub policy_number: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCancelled {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QuoteEvent {
    Initialized(QuoteInitialized),
    Renamed(QuoteRenamed),
    Bound(QuoteBound),
    Cancelled(QuoteCancelled),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QuoteEventKind {
    Initialized,
    Renamed,
    Bound,
    Cancelled,
}

impl DomainEvent for QuoteEvent {
    type Kind = QuoteEventKind;

    fn kind(&self) -> QuoteEventKind {
        match self {
            QuoteEvent::Initialized(_) => QuoteEventKind::Initialized,
            QuoteEvent::Renamed(_) => QuoteEventKind::Renamed,
            QuoteEvent::Bound(_) => QuoteEventKind::Bound,
            QuoteEvent::Cancelled(_) => QuoteEventKind::Cancelled,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            QuoteEvent::Initialized(_) => "quote.initialized",
            QuoteEvent::Renamed(_) => "quote.renamed",
            QuoteEvent::Bound(_) => "quote.bound",
            QuoteEvent::Cancelled(_) => "quote.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QuoteEvent::Initialized(e) => e.occurred_at,
            QuoteEvent::Renamed(e) => e.occurred_at,
            QuoteEvent::Bound(e) => e.occurred_at,
            QuoteEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Quote {
    const AGGREGATE_TYPE: &'static str = "quote";

    type Command = QuoteCommand;
    type Event = QuoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &QuoteEvent) {
        match event {
            QuoteEvent::Initialized(e) => {
                self.initialized = true;
                self.name = e.name.clone();
                self.product_code = e.product_code.clone();
                self.premium_cents = e.premium_cents;
                self.status = QuoteStatus::Draft;
            }
            QuoteEvent::Renamed(e) => self.name = e.name.clone(),
            QuoteEvent::Bound(e) => {
                self.status = QuoteStatus::Bound;
                self.policy_number = Some(e.policy_number.clone());
            }
            QuoteEvent::Cancelled(_) => self.status = QuoteStatus::Cancelled,
        }
        self.last_modified_at = Some(event.occurred_at());
    }

    fn handle(&self, command: &QuoteCommand) -> Result<Vec<QuoteEvent>, DomainError> {
        match command {
            QuoteCommand::Initialize(cmd) => self.handle_initialize(cmd),
            QuoteCommand::Rename(cmd) => self.handle_rename(cmd),
            QuoteCommand::Bind(cmd) => self.handle_bind(cmd),
            QuoteCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Quote {
    fn handle_initialize(&self, cmd: &InitializeQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        if self.initialized {
            return Err(DomainError::AlreadyExists);
        }
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("quote name cannot be empty"));
        }
        if cmd.product_code.trim().is_empty() {
            return Err(DomainError::validation("product code cannot be empty"));
        }
        if cmd.premium_cents < 0 {
            return Err(DomainError::validation("premium cannot be negative"));
        }

        Ok(vec![QuoteEvent::Initialized(QuoteInitialized {
            name: name.to_string(),
            product_code: cmd.product_code.trim().to_uppercase(),
            premium_cents: cmd.premium_cents,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_initialized()?;
        self.ensure_draft()?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("quote name cannot be empty"));
        }
        if name == self.name {
            return Ok(vec![]);
        }

        Ok(vec![QuoteEvent::Renamed(QuoteRenamed {
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_bind(&self, cmd: &BindQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_initialized()?;
        self.ensure_draft()?;

        if cmd.policy_number.trim().is_empty() {
            return Err(DomainError::validation("policy number cannot be empty"));
        }

        Ok(vec![QuoteEvent::Bound(QuoteBound {
            policy_number: cmd.policy_number.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_initialized()?;
        self.ensure_draft()?;

        Ok(vec![QuoteEvent::Cancelled(QuoteCancelled {
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
