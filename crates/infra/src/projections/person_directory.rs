//! Person directory projection.

use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use policystream_core::{AggregateId, TenantId};
use policystream_events::{
    AggregateRoot, EventEnvelope, HandlerContext, HandlerFuture, HandlerResult, ObserverHandlers,
};
use policystream_identity::{Person, PersonEvent, PersonEventKind};

use crate::read_model::{ReadModel, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDirectoryEntry {
    pub tenant_id: TenantId,
    pub person_id: AggregateId,
    pub given_name: String,
    pub family_name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl ReadModel for PersonDirectoryEntry {
    const PROJECTION: &'static str = "person_directory";
}

pub struct PersonDirectoryWriter<S> {
    store: S,
}

impl<S> PersonDirectoryWriter<S>
where
    S: TenantStore<PersonDirectoryEntry> + 'static,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn handlers(self: Arc<Self>) -> ObserverHandlers<Self, Person> {
        ObserverHandlers::new(PersonDirectoryEntry::PROJECTION, self)
            .on(PersonEventKind::Registered, Self::on_registered)
            .on(PersonEventKind::Renamed, Self::on_renamed)
    }

    fn on_registered<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        person: &'a AggregateRoot<Person>,
        event: &'a EventEnvelope<PersonEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.registered(ctx, person, event))
    }

    fn on_renamed<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
        _person: &'a AggregateRoot<Person>,
        event: &'a EventEnvelope<PersonEvent>,
    ) -> HandlerFuture<'a> {
        Box::pin(self.renamed(ctx, event))
    }

    async fn registered(
        &self,
        ctx: &mut HandlerContext,
        person: &AggregateRoot<Person>,
        event: &EventEnvelope<PersonEvent>,
    ) -> HandlerResult {
        let PersonEvent::Registered(e) = event.payload() else {
            bail!("expected identity.person.registered, got {}", event.event_type());
        };
        let (tenant_id, person_id) = (event.tenant_id(), event.aggregate_id());

        if person.is_replaying() {
            self.store.delete(tenant_id, person_id.into()).await?;
        }

        let row = PersonDirectoryEntry {
            tenant_id,
            person_id,
            given_name: e.given_name.clone(),
            family_name: e.family_name.clone(),
            display_name: e.display_name(),
            created_at: event.timestamp(),
            last_modified_at: event.timestamp(),
        };
        self.store.upsert(tenant_id, person_id.into(), row).await?;
        ctx.projected(PersonDirectoryEntry::PROJECTION, tenant_id, person_id);
        Ok(())
    }

    async fn renamed(&self, ctx: &mut HandlerContext, event: &EventEnvelope<PersonEvent>) -> HandlerResult {
        let PersonEvent::Renamed(e) = event.payload() else {
            bail!("expected identity.person.renamed, got {}", event.event_type());
        };
        let (tenant_id, person_id) = (event.tenant_id(), event.aggregate_id());

        let Some(mut row) = self.store.get(tenant_id, person_id.into()).await? else {
            return Ok(());
        };
        row.given_name = e.given_name.clone();
        row.family_name = e.family_name.clone();
        row.display_name = e.display_name();
        row.last_modified_at = event.timestamp();

        self.store.upsert(tenant_id, person_id.into(), row).await?;
        ctx.projected(PersonDirectoryEntry::PROJECTION, tenant_id, person_id);
        Ok(())
    }

    pub async fn get(&self, tenant_id: TenantId, person_id: AggregateId) -> anyhow::Result<Option<PersonDirectoryEntry>> {
        Ok(self.store.get(tenant_id, person_id.into()).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use policystream_identity::{CreateUser, PersonCommand, PersonId, RegisterPerson, RenamePerson, UserCommand};

    use super::*;
    use crate::config::InfraConfig;
    use crate::services::PolicyServices;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[tokio::test]
    async fn person_rebuild_twice_yields_same_rows() {
        let services = PolicyServices::in_memory(&InfraConfig::default());
        let tenant_id = TenantId::new();
        let (person_id, user_id) = (AggregateId::new(), AggregateId::new());

        services
            .people
            .create_with(
                tenant_id,
                person_id,
                PersonCommand::Register(RegisterPerson {
                    given_name: "Ada".into(),
                    family_name: "Okafor".into(),
                    occurred_at: at(1),
                }),
            )
            .await
            .unwrap();
        services
            .users
            .create_with(
                tenant_id,
                user_id,
                UserCommand::Create(CreateUser {
                    login_email: "ada@example.com".into(),
                    person_id: Some(PersonId(person_id)),
                    occurred_at: at(2),
                }),
            )
            .await
            .unwrap();
        services
            .people
            .update_with(
                tenant_id,
                person_id,
                PersonCommand::Rename(RenamePerson {
                    given_name: "Adaeze".into(),
                    family_name: "Okafor".into(),
                    occurred_at: at(5),
                }),
            )
            .await
            .unwrap();

        let people = &services.projections.person_directory;
        let users = &services.projections.user_directory;
        let live_person = people.get(tenant_id, person_id).await.unwrap().unwrap();
        let live_user = users.get(tenant_id, user_id).await.unwrap().unwrap();
        assert_eq!(live_user.person_display_name.as_deref(), Some("Adaeze Okafor"));

        let rebuilder = services.person_rebuilder();
        let report = rebuilder.rebuild_aggregate(tenant_id, person_id).await.unwrap();
        assert_eq!(report.events, 2);
        assert_eq!(people.get(tenant_id, person_id).await.unwrap().unwrap(), live_person);
        assert_eq!(users.get(tenant_id, user_id).await.unwrap().unwrap(), live_user);

        rebuilder.rebuild_aggregate(tenant_id, person_id).await.unwrap();
        let person = people.get(tenant_id, person_id).await.unwrap().unwrap();
        let user = users.get(tenant_id, user_id).await.unwrap().unwrap();
        assert_eq!(person, live_person);
        assert_eq!(user, live_user);
        assert_eq!((person.created_at, person.last_modified_at), (at(1), at(5)));
        assert_eq!(user.last_modified_at, at(5));
    }
}
