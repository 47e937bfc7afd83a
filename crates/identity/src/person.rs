//! Person aggregate (event-sourced).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use policystream_core::{Aggregate, AggregateId, DomainError};
use policystream_events::DomainEvent;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub AggregateId);

impl PersonId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PersonId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A natural person known to the tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Person {
    pub registered: bool,
    pub given_name: String,
    pub family_name: String,
}

impl Person {
    /// "Given Family", the form shown in directories.
    pub fn display_name(&self) -> String {
        display_name(&self.given_name, &self.family_name)
    }
}

pub(crate) fn display_name(given: &str, family: &str) -> String {
    match (given.is_empty(), family.is_empty()) {
        (false, false) => format!("{given} {family}"),
        (false, true) => given.to_string(),
        _ => family.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPerson {
    pub given_name: String,
    pub family_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenamePerson {
    pub given_name: String,
    pub family_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersonCommand {
    Register(RegisterPerson),
    Rename(RenamePerson),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRegistered {
    pub given_name: String,
    pub family_name: String,
    pub occurred_at: DateTime<Utc>,
}

impl PersonRegistered {
    pub fn display_name(&self) -> String {
        display_name(&self.given_name, &self.family_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRenamed {
    pub given_name: String,
    pub family_name: String,
    pub occurred_at: DateTime<Utc>,
}

impl PersonRenamed {
    pub fn display_name(&self) -> String {
        display_name(&self.given_name, &self.family_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PersonEvent {
    Registered(PersonRegistered),
    Renamed(PersonRenamed),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PersonEventKind {
    Registered,
    Renamed,
}

impl DomainEvent for PersonEvent {
    type Kind = PersonEventKind;

    fn kind(&self) -> PersonEventKind {
        match self {
            PersonEvent::Registered(_) => PersonEventKind::Registered,
            PersonEvent::Renamed(_) => PersonEventKind::Renamed,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            PersonEvent::Registered(_) => "identity.person.registered",
            PersonEvent::Renamed(_) => "identity.person.renamed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PersonEvent::Registered(e) => e.occurred_at,
            PersonEvent::Renamed(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for Person {
    const AGGREGATE_TYPE: &'static str = "person";

    type Command = PersonCommand;
    type Event = PersonEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &PersonEvent) {
        match event {
            PersonEvent::Registered(e) => {
                self.registered = true;
                self.given_name = e.given_name.clone();
                self.family_name = e.family_name.clone();
            }
            PersonEvent::Renamed(e) => {
                self.given_name = e.given_name.clone();
                self.family_name = e.family_name.clone();
            }
        }
    }

    fn handle(&self, command: &PersonCommand) -> Result<Vec<PersonEvent>, DomainError> {
        match command {
            PersonCommand::Register(cmd) => {
                if self.registered {
                    return Err(DomainError::AlreadyExists);
                }
                let (given, family) = validate_name(&cmd.given_name, &cmd.family_name)?;
                Ok(vec![PersonEvent::Registered(PersonRegistered {
                    given_name: given,
                    family_name: family,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PersonCommand::Rename(cmd) => {
                if !self.registered {
                    return Err(DomainError::NotFound);
                }
                let (given, family) = validate_name(&cmd.given_name, &cmd.family_name)?;
                if given == self.given_name && family == self.family_name {
                    return Ok(vec![]);
                }
                Ok(vec![PersonEvent::Renamed(PersonRenamed {
                    given_name: given,
                    family_name: family,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

fn validate_name(given: &str, family: &str) -> Result<(String, String), DomainError> {
    let (given, family) = (given.trim(), family.trim());
    if given.is_empty() && family.is_empty() {
        return Err(DomainError::validation("person needs a given or family name"));
    }
    Ok((given.to_string(), family.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn registered(given: &str, family: &str) -> Person {
        let mut person = Person::default();
        let events = person
            .handle(&PersonCommand::Register(RegisterPerson {
                given_name: given.into(),
                family_name: family.into(),
                occurred_at: at(0),
            }))
            .unwrap();
        for e in &events {
            person.apply(e);
        }
        person
    }

    #[test]
    fn display_name_handles_missing_parts() {
        assert_eq!(registered("Ada", "Lovelace").display_name(), "Ada Lovelace");
        assert_eq!(registered("Ada", "").display_name(), "Ada");
        assert_eq!(registered("", "Lovelace").display_name(), "Lovelace");
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Person::default()
            .handle(&PersonCommand::Register(RegisterPerson {
                given_name: " ".into(),
                family_name: "".into(),
                occurred_at: at(0),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rename_to_identical_name_is_a_no_op() {
        let person = registered("Ada", "Lovelace");
        let events = person
            .handle(&PersonCommand::Rename(RenamePerson {
                given_name: " Ada".into(),
                family_name: "Lovelace ".into(),
                occurred_at: at(1),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn event_type_is_namespaced() {
        let event = PersonEvent::Renamed(PersonRenamed {
            given_name: "A".into(),
            family_name: "B".into(),
            occurred_at: at(0),
        });
        assert_eq!(event.event_type(), "identity.person.renamed");
        assert_eq!(serde_json::to_value(&event).unwrap()["kind"], "renamed");
    }
}
