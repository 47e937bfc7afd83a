//! User directory projection.
//!
//! Each row carries the linked person's display name. The writer therefore
//! listens to two aggregate types and registers two handler tables:
//!
//! - user events maintain the user's own row;
//! - person events fan out to every user row that references the person.
//!
//! The person directory is read as a lookup source only. A user may be linked
//! to a person whose row does not exist yet; the name is then left empty and
//! filled in when the person's events arrive.

use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use policystream_core::{AggregateId, TenantId};
use policystream_events::{
    AggregateRoot, EventEnvelope, HandlerContext, HandlerFuture, HandlerResult, ObserverHandlers,
};
use policystream_identity::{Person, PersonEvent, PersonEventKind, User, UserEvent, UserEventKind, UserStatus};

use crate::projections::person_directory::PersonDirectoryEntry;
use crate::read_model::{ReadModel, TenantStore};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectoryEntry {
    pub tenant_id: TenantId,
    pub user_id: AggregateId,
    pub login_email: String,
    pub roles: Vec<String>,
    pub status: UserStatus,
    pub person_id: Option<AggregateId>,
    /// Copied from the person directory; `None` until the person is known.
    pub person_display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl ReadModel for UserDirectoryEntry {
    const PROJECTION: &'static str = "user_directory";
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

pub struct UserDirectoryWriter<U, P> {
    users: U,
    people: P,
}

impl<U, P> UserDirectoryWriter<U, P>
where
    U: TenantStore<UserDirectoryEntry> + 'static,
    P: TenantStore<PersonDirectoryEntry> + 'static,
{
    pub fn new(users: U, people: P) -> Self {
        Self { users, people }
    }

    /// Handlers for the user dispatcher.
    pub fn user_handlers(self: Arc<Self>) -> ObserverHandlers<Self, User> {
        ObserverHandlers::new(UserDirectoryEntry::PROJECTION, self)
            .on(UserEventKind::Created, Self::on_user_created)
            .on(UserEventKind::LoginEmailChanged, Self::on_user_changed)
            .on(UserEventKind::RoleAssigned, Self::on_user_changed)
            .on(UserEventKind::RoleRevoked, Self::on_user_changed)
            .on(UserEventKind::PersonLinked, Self::on_user_changed)
            .on(UserEventKind::Deactivated, Self::on_user_changed)
    }

    /// Handlers for the person dispatcher (cross-entity fan-out).
    pub fn person_handlers(self: Arc<Self>) -> ObserverHandlers<Self, Person> {
        ObserverHandlers::new(UserDirectoryEntry::PROJECTION, self)
            .on(PersonEventKind::Registered, Self::on_person_named)
            .on(PersonEventKind::Renamed, Self::on_person_named)
    }

    fn on_user_created<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        user: &'a AggregateRoot<User>,
        event: &'a EventEnvelope<UserEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.user_created(ctx, user, event))
    }

    fn on_user_changed<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        _user: &'a AggregateRoot<User>,
        event: &'a EventEnvelope<UserEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.user_changed(ctx, event))
    }

    fn on_person_named<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        _person: &'a AggregateRoot<Person>,
        event: &'a EventEnvelope<PersonEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.person_named(ctx, event))
    }

    async fn person_display_name(
        &self,
        tenant_id: TenantId,
        person_id: Option<AggregateId>,
    ) -> anyhow::Result<Option<String>> {
        let Some(person_id) = person_id else {
            return Ok(None);
        };
        let person = self.people.get(tenant_id, person_id.into()).await?;
        Ok(person.map(|p| p.display_name))
    }

    async fn user_created(
        &self,
        ctx: &mut HandlerContext,
        user: &AggregateRoot<User>,
        event: &EventEnvelope<UserEvent>,
    ) -> HandlerResult {
        let UserEvent::Created(e) = event.payload() else {
            bail!("expected identity.user.created, got {}", event.event_type());
        };
        let (tenant_id, user_id) = (event.tenant_id(), event.aggregate_id());

        if user.is_replaying() && self.users.delete(tenant_id, user_id.into()).await? {
            debug!(%user_id, "replaying: dropped existing user directory entry");
        }

        let person_id = e.person_id.map(|p| p.0);
        let row = UserDirectoryEntry {
            tenant_id,
            user_id,
            login_email: e.login_email.clone(),
            roles: Vec::new(),
            status: UserStatus::Active,
            person_id,
            person_display_name: self.person_display_name(tenant_id, person_id).await?,
            created_at: event.timestamp(),
            last_modified_at: event.timestamp(),
        };
        self.users.upsert(tenant_id, user_id.into(), row).await?;
        ctx.projected(UserDirectoryEntry::PROJECTION, tenant_id, user_id);
        Ok(())
    }

    async fn user_changed(&self, ctx: &mut HandlerContext, event: &EventEnvelope<UserEvent>) -> HandlerResult {
        let (tenant_id, user_id) = (event.tenant_id(), event.aggregate_id());

        let Some(mut row) = self.users.get(tenant_id, user_id.into()).await? else {
            return Ok(());
        };

        match event.payload() {
            UserEvent::LoginEmailChanged(e) => row.login_email = e.login_email.clone(),
            UserEvent::RoleAssigned(e) => {
                if !row.roles.contains(&e.role) {
                    row.roles.push(e.role.clone());
                    row.roles.sort();
                }
            }
            UserEvent::RoleRevoked(e) => row.roles.retain(|r| r != &e.role),
            UserEvent::PersonLinked(e) => {
                row.person_id = Some(e.person_id.0);
                row.person_display_name = self.person_display_name(tenant_id, row.person_id).await?;
            }
            UserEvent::Deactivated(_) => row.status = UserStatus::Deactivated,
            UserEvent::Created(_) => bail!("identity.user.created routed to update handler"),
        }
        row.last_modified_at = event.timestamp();

        self.users.upsert(tenant_id, user_id.into(), row).await?;
        ctx.projected(UserDirectoryEntry::PROJECTION, tenant_id, user_id);
        Ok(())
    }

    /// Fan out a person's (new) name to every user row that references it.
    async fn person_named(&self, ctx: &mut HandlerContext, event: &EventEnvelope<PersonEvent>) -> HandlerResult {
        let display_name = match event.payload() {
            PersonEvent::Registered(e) => e.display_name(),
            PersonEvent::Renamed(e) => e.display_name(),
        };
        let (tenant_id, person_id) = (event.tenant_id(), event.aggregate_id());

        let linked = self
            .users
            .find_by_field(tenant_id, "person_id", &serde_json::to_value(person_id)?)
            .await?;
        debug!(%person_id, users = linked.len(), "fanning out person name");

        for mut row in linked {
            row.person_display_name = Some(display_name.clone());
            // A newer user event keeps its timestamp.
            row.last_modified_at = row.last_modified_at.max(event.timestamp());
            let user_id = row.user_id;
            self.users.upsert(tenant_id, user_id.into(), row).await?;
            ctx.projected(UserDirectoryEntry::PROJECTION, tenant_id, user_id);
        }
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId, user_id: AggregateId) -> anyhow::Result<Option<UserDirectoryEntry>> {
        Ok(self.users.get(tenant_id, user_id.into()).await?)
    }

    /// Users linked to `person_id`.
    pub async fn by_person(
        &self,
        tenant_id: TenantId,
        person_id: AggregateId,
    ) -> anyhow::Result<Vec<UserDirectoryEntry>> {
        Ok(self
            .users
            .find_by_field(tenant_id, "person_id", &serde_json::to_value(person_id)?)
            .await?)
    }
}
