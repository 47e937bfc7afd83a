//! Minimal aggregate used by this crate's unit tests.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use policystream_core::{Aggregate, DomainError};

use crate::DomainEvent;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Note {
    pub created: bool,
    pub title: String,
    pub archived: bool,
}

#[derive(Debug, Clone)]
pub enum NoteCommand {
    Create { title: String, at: DateTime<Utc> },
    Retitle { title: String, at: DateTime<Utc> },
    Archive { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NoteEvent {
    Created { title: String, at: DateTime<Utc> },
    Retitled { title: String, at: DateTime<Utc> },
    Archived { at: DateTime<Utc> },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NoteEventKind {
    Created,
    Retitled,
    Archived,
}

impl DomainEvent for NoteEvent {
    type Kind = NoteEventKind;

    fn kind(&self) -> NoteEventKind {
        match self {
            NoteEvent::Created { .. } => NoteEventKind::Created,
            NoteEvent::Retitled { .. } => NoteEventKind::Retitled,
            NoteEvent::Archived { .. } => NoteEventKind::Archived,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            NoteEvent::Created { .. } => "note.created",
            NoteEvent::Retitled { .. } => "note.retitled",
            NoteEvent::Archived { .. } => "note.archived",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            NoteEvent::Created { at, .. } | NoteEvent::Retitled { at, .. } | NoteEvent::Archived { at } => *at,
        }
    }
}

impl Aggregate for Note {
    const AGGREGATE_TYPE: &'static str = "note";

    type Command = NoteCommand;
    type Event = NoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &NoteEvent) {
        match event {
            NoteEvent::Created { title, .. } => {
                self.created = true;
                self.title = title.clone();
            }
            NoteEvent::Retitled { title, .. } => self.title = title.clone(),
            NoteEvent::Archived { .. } => self.archived = true,
        }
    }

    fn handle(&self, command: &NoteCommand) -> Result<Vec<NoteEvent>, DomainError> {
        match command {
            NoteCommand::Create { title, at } => {
                if self.created {
                    return Err(DomainError::AlreadyExists);
                }
                Ok(vec![NoteEvent::Created { title: title.clone(), at: *at }])
            }
            NoteCommand::Retitle { title, at } => {
                if !self.created {
                    return Err(DomainError::NotFound);
                }
                Ok(vec![NoteEvent::Retitled { title: title.clone(), at: *at }])
            }
            NoteCommand::Archive { at } => {
                if !self.created {
                    return Err(DomainError::NotFound);
                }
                Ok(vec![NoteEvent::Archived { at: *at }])
            }
        }
    }
}
