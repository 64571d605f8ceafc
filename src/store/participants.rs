use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

pub const STATUS_ENABLED: &str = "enabled";
pub const STATUS_DISABLED: &str = "disabled";

pub fn check_status(status: &str) -> AppResult<()> {
    match status {
        STATUS_ENABLED | STATUS_DISABLED => Ok(()),
        other => Err(AppError::BadRequest(format!(
            "unknown participant status: {other}"
        ))),
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub static SPEC: EntitySpec = EntitySpec {
    table: "participants",
    columns: "id, name, status, created_at, updated_at",
    filters: &[
        FilterField {
            name: "name",
            column: "name",
            kind: FilterKind::Contains,
        },
        FilterField {
            name: "status",
            column: "status",
            kind: FilterKind::Exact,
        },
    ],
    scope: ScopeColumns {
        participant: Some("id"),
        provider: None,
        consumer: None,
        agent: None,
    },
    default_sort: "id",
};

pub async fn create(pool: &PgPool, name: &str, status: &str) -> AppResult<Participant> {
    check_status(status)?;
    let participant = sqlx::query_as::<_, Participant>(
        "INSERT INTO participants (id, name, status, created_at, updated_at) \
         VALUES ($1, $2, $3, NOW(), NOW()) \
         RETURNING id, name, status, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(status)
    .fetch_one(pool)
    .await?;
    Ok(participant)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Participant> {
    let participant = sqlx::query_as::<_, Participant>(
        "SELECT id, name, status, created_at, updated_at FROM participants WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    participant.ok_or(AppError::NotFound)
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    name: Option<&str>,
    status: Option<&str>,
) -> AppResult<Participant> {
    if let Some(status) = status {
        check_status(status)?;
    }
    let result = sqlx::query(
        "UPDATE participants SET name = COALESCE($2, name), status = COALESCE($3, status), \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(name)
    .bind(status)
    .execute(pool)
    .await?;
    expect_updated(result)?;
    get_by_id(pool, id).await
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM agents WHERE provider_id = $1) \
              + (SELECT COUNT(*) FROM service_groups WHERE consumer_id = $1)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if in_use > 0 {
        return Err(AppError::Conflict(
            "participant still owns agents or service groups".into(),
        ));
    }
    let result = sqlx::query("DELETE FROM participants WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

pub async fn exists(pool: &PgPool, id: Uuid) -> AppResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM participants WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}
