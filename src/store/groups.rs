use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroup {
    pub id: Uuid,
    pub name: String,
    pub consumer_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub static SPEC: EntitySpec = EntitySpec {
    table: "service_groups",
    columns: "id, name, consumer_id, created_at, updated_at",
    filters: &[
        FilterField {
            name: "name",
            column: "name",
            kind: FilterKind::Contains,
        },
        FilterField {
            name: "consumerId",
            column: "consumer_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: None,
        consumer: Some("consumer_id"),
        agent: None,
    },
    default_sort: "id",
};

pub async fn create(pool: &PgPool, name: &str, consumer_id: Uuid) -> AppResult<ServiceGroup> {
    let group = sqlx::query_as::<_, ServiceGroup>(
        "INSERT INTO service_groups (id, name, consumer_id, created_at, updated_at) \
         VALUES ($1, $2, $3, NOW(), NOW()) \
         RETURNING id, name, consumer_id, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(consumer_id)
    .fetch_one(pool)
    .await?;
    Ok(group)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<ServiceGroup> {
    sqlx::query_as::<_, ServiceGroup>(
        "SELECT id, name, consumer_id, created_at, updated_at FROM service_groups WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn rename(pool: &PgPool, id: Uuid, name: &str) -> AppResult<ServiceGroup> {
    let result = sqlx::query("UPDATE service_groups SET name = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    expect_updated(result)?;
    get_by_id(pool, id).await
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE group_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("service group is not empty".into()));
    }
    let result = sqlx::query("DELETE FROM service_groups WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}
