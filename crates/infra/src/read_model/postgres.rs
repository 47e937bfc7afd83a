//! Postgres-backed read model storage.
//!
//! All projections share one JSONB document table partitioned by projection
//! name. Rows are keyed `(projection, tenant_id, id)`; a GIN index on the
//! document serves `find_by_field` lookups such as "users linked to person X".

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use policystream_core::TenantId;

use super::{ReadModel, ReadModelError, TenantStore};

/// DDL for the shared read model table. Applied by [`PostgresTenantStore::migrate`].
pub const READ_MODELS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS read_models (
    projection  TEXT        NOT NULL,
    tenant_id   UUID        NOT NULL,
    id          UUID        NOT NULL,
    document    JSONB       NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (projection, tenant_id, id)
);
CREATE INDEX IF NOT EXISTS read_models_document ON read_models USING GIN (document jsonb_path_ops);
"#;

/// Postgres-backed [`TenantStore`] for read model `V`.
///
/// Every query is scoped by `V::PROJECTION` and `tenant_id`.
pub struct PostgresTenantStore<V> {
    pool: PgPool,
    _model: PhantomData<fn() -> V>,
}

impl<V> Clone for PostgresTenantStore<V> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _model: PhantomData,
        }
    }
}

impl<V: ReadModel> PostgresTenantStore<V> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _model: PhantomData,
        }
    }

    pub async fn migrate(&self) -> Result<(), ReadModelError> {
        sqlx::raw_sql(READ_MODELS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| storage("migrate", e))?;
        Ok(())
    }

    fn decode(document: JsonValue) -> Result<V, ReadModelError> {
        serde_json::from_value(document).map_err(|e| {
            ReadModelError::Serialization(format!("cannot decode {} row: {e}", V::PROJECTION))
        })
    }
}

fn storage(operation: &str, err: sqlx::Error) -> ReadModelError {
    ReadModelError::Storage(format!("{operation}: {err}"))
}

#[async_trait]
impl<V: ReadModel> TenantStore<V> for PostgresTenantStore<V> {
    #[instrument(skip(self), fields(projection = V::PROJECTION), err)]
    async fn get(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<V>, ReadModelError> {
        let document: Option<JsonValue> = sqlx::query_scalar(
            "SELECT document FROM read_models WHERE projection = $1 AND tenant_id = $2 AND id = $3",
        )
        .bind(V::PROJECTION)
        .bind(tenant_id.as_uuid())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("get", e))?;

        document.map(Self::decode).transpose()
    }

    #[instrument(skip(self, value), fields(projection = V::PROJECTION), err)]
    async fn upsert(&self, tenant_id: TenantId, id: Uuid, value: V) -> Result<(), ReadModelError> {
        let document = serde_json::to_value(&value)
            .map_err(|e| ReadModelError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO read_models (projection, tenant_id, id, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (projection, tenant_id, id)
            DO UPDATE SET
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(V::PROJECTION)
        .bind(tenant_id.as_uuid())
        .bind(id)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("upsert", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(projection = V::PROJECTION), err)]
    async fn delete(&self, tenant_id: TenantId, id: Uuid) -> Result<bool, ReadModelError> {
        let result = sqlx::query(
            "DELETE FROM read_models WHERE projection = $1 AND tenant_id = $2 AND id = $3",
        )
        .bind(V::PROJECTION)
        .bind(tenant_id.as_uuid())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("delete", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, ReadModelError> {
        let documents: Vec<JsonValue> = sqlx::query_scalar(
            "SELECT document FROM read_models WHERE projection = $1 AND tenant_id = $2 ORDER BY id",
        )
        .bind(V::PROJECTION)
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("list", e))?;

        documents.into_iter().map(Self::decode).collect()
    }

    async fn find_by_field(
        &self,
        tenant_id: TenantId,
        field: &str,
        value: &JsonValue,
    ) -> Result<Vec<V>, ReadModelError> {
        let mut probe = serde_json::Map::new();
        probe.insert(field.to_string(), value.clone());
        let probe = JsonValue::Object(probe);

        let documents: Vec<JsonValue> = sqlx::query_scalar(
            r#"
            SELECT document FROM read_models
            WHERE projection = $1 AND tenant_id = $2 AND document @> $3
            ORDER BY id
            "#,
        )
        .bind(V::PROJECTION)
        .bind(tenant_id.as_uuid())
        .bind(&probe)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("find_by_field", e))?;

        documents.into_iter().map(Self::decode).collect()
    }

    async fn clear_tenant(&self, tenant_id: TenantId) -> Result<(), ReadModelError> {
        sqlx::query("DELETE FROM read_models WHERE projection = $1 AND tenant_id = $2")
            .bind(V::PROJECTION)
            .bind(tenant_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| storage("clear_tenant", e))?;
        Ok(())
    }
}
