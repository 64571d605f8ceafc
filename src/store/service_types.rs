use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lifecycle::LifecycleSchema;
use crate::schema::PropertySchema;
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    pub id: Uuid,
    pub name: String,
    pub property_schema: Value,
    pub lifecycle_schema: Value,
    pub created_at: DateTime<Utc>,
}

impl ServiceType {
    pub fn properties(&self) -> AppResult<PropertySchema> {
        PropertySchema::parse(&self.property_schema)
    }

    pub fn lifecycle(&self) -> AppResult<LifecycleSchema> {
        LifecycleSchema::parse(&self.lifecycle_schema)
    }
}

pub static SPEC: EntitySpec = EntitySpec {
    table: "service_types",
    columns: "id, name, property_schema, lifecycle_schema, created_at",
    filters: &[FilterField {
        name: "name",
        column: "name",
        kind: FilterKind::Contains,
    }],
    scope: ScopeColumns {
        participant: None,
        provider: None,
        consumer: None,
        agent: None,
    },
    default_sort: "id",
};

pub async fn create(
    pool: &PgPool,
    name: &str,
    property_schema: &Value,
    lifecycle_schema: &Value,
) -> AppResult<ServiceType> {
    // Both schemas must parse before the catalog entry is accepted.
    PropertySchema::parse(property_schema)?;
    LifecycleSchema::parse(lifecycle_schema)?;
    let service_type = sqlx::query_as::<_, ServiceType>(
        "INSERT INTO service_types (id, name, property_schema, lifecycle_schema, created_at) \
         VALUES ($1, $2, $3, $4, NOW()) \
         RETURNING id, name, property_schema, lifecycle_schema, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(property_schema)
    .bind(lifecycle_schema)
    .fetch_one(pool)
    .await?;
    Ok(service_type)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<ServiceType> {
    sqlx::query_as::<_, ServiceType>(
        "SELECT id, name, property_schema, lifecycle_schema, created_at \
         FROM service_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE service_type_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("service type is in use by services".into()));
    }
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query("DELETE FROM agent_type_service_types WHERE service_type_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM service_types WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    expect_updated(result)?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(())
}
