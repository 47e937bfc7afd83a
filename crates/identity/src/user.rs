//! User account aggregate (event-sourced).
//!
//! A user is a login inside one tenant. It may be linked to a `Person`, whose
//! display name the user directory copies.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use policystream_core::{Aggregate, DomainError};
use policystream_events::DomainEvent;

use crate::PersonId;

// ─────────────────────────────────────────────────────────────────────────────
// User Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Deactivated,
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Deactivated => write!(f, "deactivated"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// User account state.
///
/// # Invariants
/// - The login email is lowercase and unique per user (uniqueness across users is not checked here).
/// - Deactivated users accept no further commands.
/// - A user is linked to at most one person at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub created: bool,
    pub login_email: String,
    pub roles: BTreeSet<String>,
    pub person_id: Option<PersonId>,
    pub status: UserStatus,
}

impl User {
    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        if self.status == UserStatus::Deactivated {
            return Err(DomainError::precondition("user is deactivated"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub login_email: String,
    pub person_id: Option<PersonId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLoginEmail {
    pub login_email: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRole {
    pub role: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRole {
    pub role: String,
    pub occurred_at: DateTime<Utc>,
}

/// Link (or re-link) the user to a person record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPerson {
    pub person_id: PersonId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateUser {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Create(CreateUser),
    ChangeLoginEmail(ChangeLoginEmail),
    AssignRole(AssignRole),
    RevokeRole(RevokeRole),
    LinkPerson(LinkPerson),
    Deactivate(DeactivateUser),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub login_email: String,
    pub person_id: Option<PersonId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEmailChanged {
    pub login_email: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub role: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub role: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonLinked {
    pub person_id: PersonId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeactivated {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum UserEvent {
    Created(UserCreated),
    LoginEmailChanged(LoginEmailChanged),
    RoleAssigned(RoleAssigned),
    RoleRevoked(RoleRevoked),
    PersonLinked(PersonLinked),
    Deactivated(UserDeactivated),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UserEventKind {
    Created,
    LoginEmailChanged,
    RoleAssigned,
    RoleRevoked,
    PersonLinked,
    Deactivated,
}

impl DomainEvent for UserEvent {
    type Kind = UserEventKind;

    fn kind(&self) -> UserEventKind {
        match self {
            UserEvent::Created(_) => UserEventKind::Created,
            UserEvent::LoginEmailChanged(_) => UserEventKind::LoginEmailChanged,
            UserEvent::RoleAssigned(_) => UserEventKind::RoleAssigned,
            UserEvent::RoleRevoked(_) => UserEventKind::RoleRevoked,
            UserEvent::PersonLinked(_) => UserEventKind::PersonLinked,
            UserEvent::Deactivated(_) => UserEventKind::Deactivated,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "identity.user.created",
            UserEvent::LoginEmailChanged(_) => "identity.user.login_email_changed",
            UserEvent::RoleAssigned(_) => "identity.user.role_assigned",
            UserEvent::RoleRevoked(_) => "identity.user.role_revoked",
            UserEvent::PersonLinked(_) => "identity.user.person_linked",
            UserEvent::Deactivated(_) => "identity.user.deactivated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::LoginEmailChanged(e) => e.occurred_at,
            UserEvent::RoleAssigned(e) => e.occurred_at,
            UserEvent::RoleRevoked(e) => e.occurred_at,
            UserEvent::PersonLinked(e) => e.occurred_at,
            UserEvent::Deactivated(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for User {
    const AGGREGATE_TYPE: &'static str = "user";

    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &UserEvent) {
        match event {
            UserEvent::Created(e) => {
                self.created = true;
                self.login_email = e.login_email.clone();
                self.person_id = e.person_id;
                self.status = UserStatus::Active;
            }
            UserEvent::LoginEmailChanged(e) => self.login_email = e.login_email.clone(),
            UserEvent::RoleAssigned(e) => {
                self.roles.insert(e.role.clone());
            }
            UserEvent::RoleRevoked(e) => {
                self.roles.remove(&e.role);
            }
            UserEvent::PersonLinked(e) => self.person_id = Some(e.person_id),
            UserEvent::Deactivated(_) => self.status = UserStatus::Deactivated,
        }
    }

    fn handle(&self, command: &UserCommand) -> Result<Vec<UserEvent>, DomainError> {
        match command {
            UserCommand::Create(cmd) => self.handle_create(cmd),
            UserCommand::ChangeLoginEmail(cmd) => self.handle_change_email(cmd),
            UserCommand::AssignRole(cmd) => self.handle_assign_role(cmd),
            UserCommand::RevokeRole(cmd) => self.handle_revoke_role(cmd),
            UserCommand::LinkPerson(cmd) => self.handle_link_person(cmd),
            UserCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl User {
    fn handle_create(&self, cmd: &CreateUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::AlreadyExists);
        }

        Ok(vec![UserEvent::Created(UserCreated {
            login_email: normalize_email(&cmd.login_email)?,
            person_id: cmd.person_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_email(&self, cmd: &ChangeLoginEmail) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_active()?;

        let email = normalize_email(&cmd.login_email)?;
        if email == self.login_email {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::LoginEmailChanged(LoginEmailChanged {
            login_email: email,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_role(&self, cmd: &AssignRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_active()?;

        let role = cmd.role.trim();
        if role.is_empty() {
            return Err(DomainError::validation("role cannot be empty"));
        }
        if self.roles.contains(role) {
            return Err(DomainError::precondition("role already assigned"));
        }

        Ok(vec![UserEvent::RoleAssigned(RoleAssigned {
            role: role.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke_role(&self, cmd: &RevokeRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_active()?;

        if !self.roles.contains(cmd.role.trim()) {
            return Err(DomainError::precondition("role not assigned"));
        }

        Ok(vec![UserEvent::RoleRevoked(RoleRevoked {
            role: cmd.role.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link_person(&self, cmd: &LinkPerson) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_active()?;

        if self.person_id == Some(cmd.person_id) {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::PersonLinked(PersonLinked {
            person_id: cmd.person_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_active()?;

        Ok(vec![UserEvent::Deactivated(UserDeactivated {
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_lowercase();
    // Basic shape check only.
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(DomainError::validation("invalid email format")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
