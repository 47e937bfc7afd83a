use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use policystream_core::TenantId;

/// A projection row type.
pub trait ReadModel: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable projection name; also the partition key in shared storage.
    const PROJECTION: &'static str;
}

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model storage failure: {0}")]
    Storage(String),

    #[error("read model serialization failure: {0}")]
    Serialization(String),
}

/// Tenant-isolated document store for one read model type, keyed by
/// `(tenant_id, id)`.
#[async_trait]
pub trait TenantStore<V: ReadModel>: Send + Sync {
    async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<V>, ReadModelError>;

    /// Insert or replace the row.
    async fn upsert(&self, tenant_id: TenantId, id: Uuid, value: V) -> Result<(), ReadModelError>;

    /// Remove the row. Returns whether it existed.
    async fn delete(&self, tenant_id: TenantId, id: Uuid) -> Result<bool, ReadModelError>;

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError>;

    /// Rows whose top-level JSON `field` equals `value`.
    async fn find_by_field(
        &self,
        tenant_id: TenantId,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<V>, ReadModelError>;

    /// Remove every row for a tenant (full rebuild support).
    async fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError>;
}

#[async_trait]
impl<V, S> TenantStore<V> for Arc<S>
where
    V: ReadModel,
    S: TenantStore<V> + ?Sized,
{
    async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<V>, ReadModelError> {
        (**self).get(tenant_id, id).await
    }

    async fn upsert(&self, tenant_id: TenantId, id: Uuid, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(tenant_id, id, value).await
    }

    async fn delete(&self, tenant_id: TenantId, id: Uuid) -> Result<bool, ReadModelError> {
        (**self).delete(tenant_id, id).await
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        (**self).list(tenant_id).await
    }

    async fn find_by_field(
        &self,
        tenant_id: TenantId,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<V>, ReadModelError> {
        (**self).find_by_field(tenant_id, field, value).await
    }

    async fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        (**self).clear_tenant(tenant_id).await
    }
}

/// In-memory tenant-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTenantStore<V> {
    inner: RwLock<HashMap<(TenantId, Uuid), V>>,
    _model: PhantomData<fn() -> V>,
}

impl<V> InMemoryTenantStore<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            _model: PhantomData,
        }
    }
}

impl<V> Default for InMemoryTenantStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ReadModelError {
    ReadModelError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl<V: ReadModel> TenantStore<V> for InMemoryTenantStore<V> {
    async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<V>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&(tenant_id, id)).cloned())
    }

    async fn upsert(&self, tenant_id: TenantId, id: Uuid, value: V) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert((tenant_id, id), value);
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, id: Uuid) -> Result<bool, ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        Ok(map.remove(&(tenant_id, id)).is_some())
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        let mut rows: Vec<(Uuid, V)> = map
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|((_, id), v)| (*id, v.clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }

    async fn find_by_field(
        &self,
        tenant_id: TenantId,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<V>, ReadModelError> {
        let mut matches = Vec::new();
        for row in self.list(tenant_id).await? {
            let doc = serde_json::to_value(&row)
                .map_err(|e| ReadModelError::Serialization(e.to_string()))?;
            if doc.get(field) == Some(value) {
                matches.push(row);
            }
        }
        Ok(matches)
    }

    async fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.retain(|(t, _), _| *t != tenant_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        owner: String,
        n: u32,
    }

    impl ReadModel for Row {
        const PROJECTION: &'static str = "rows";
    }

    #[tokio::test]
    async fn rows_are_tenant_isolated() {
        let store = InMemoryTenantStore::<Row>::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        let id = Uuid::now_v7();

        store.upsert(t1, id, Row { owner: "a".into(), n: 1 }).await.unwrap();

        assert!(store.get(t2, id).await.unwrap().is_none());
        assert_eq!(store.get(t1, id).await.unwrap().unwrap().n, 1);
        assert!(store.list(t2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryTenantStore::<Row>::new();
        let t = TenantId::new();
        let id = Uuid::now_v7();
        store.upsert(t, id, Row { owner: "a".into(), n: 1 }).await.unwrap();

        assert!(store.delete(t, id).await.unwrap());
        assert!(!store.delete(t, id).await.unwrap());
    }

    #[tokio::test]
    async fn find_by_field_matches_top_level_value() {
        let store = InMemoryTenantStore::<Row>::new();
        let t = TenantId::new();
        store.upsert(t, Uuid::now_v7(), Row { owner: "a".into(), n: 1 }).await.unwrap();
        store.upsert(t, Uuid::now_v7(), Row { owner: "b".into(), n: 2 }).await.unwrap();
        store.upsert(t, Uuid::now_v7(), Row { owner: "a".into(), n: 3 }).await.unwrap();

        let found = store.find_by_field(t, "owner", &json!("a")).await.unwrap();
        let mut ns: Vec<u32> = found.iter().map(|r| r.n).collect();
        ns.sort();
        assert_eq!(ns, vec![1, 3]);
    }

    #[tokio::test]
    async fn clear_tenant_leaves_other_tenants() {
        let store = InMemoryTenantStore::<Row>::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        store.upsert(t1, Uuid::now_v7(), Row { owner: "a".into(), n: 1 }).await.unwrap();
        store.upsert(t2, Uuid::now_v7(), Row { owner: "a".into(), n: 2 }).await.unwrap();

        store.clear_tenant(t1).await.unwrap();
        assert!(store.list(t1).await.unwrap().is_empty());
        assert_eq!(store.list(t2).await.unwrap().len(), 1);
    }
}
