use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AgentType {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub static SPEC: EntitySpec = EntitySpec {
    table: "agent_types",
    columns: "id, name, created_at",
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

pub async fn create(pool: &PgPool, name: &str, service_type_ids: &[Uuid]) -> AppResult<AgentType> {
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let agent_type = sqlx::query_as::<_, AgentType>(
        "INSERT INTO agent_types (id, name, created_at) VALUES ($1, $2, NOW()) \
         RETURNING id, name, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .fetch_one(&mut *tx)
    .await?;
    for service_type_id in service_type_ids {
        sqlx::query(
            "INSERT INTO agent_type_service_types (agent_type_id, service_type_id) VALUES ($1, $2)",
        )
        .bind(agent_type.id)
        .bind(service_type_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await.map_err(AppError::from)?;
    Ok(agent_type)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<AgentType> {
    sqlx::query_as::<_, AgentType>("SELECT id, name, created_at FROM agent_types WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// Service types this agent type declares support for.
pub async fn service_type_ids(pool: &PgPool, id: Uuid) -> AppResult<Vec<Uuid>> {
    let ids = sqlx::query_scalar(
        "SELECT service_type_id FROM agent_type_service_types WHERE agent_type_id = $1",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

pub async fn supports_service_type(
    pool: &PgPool,
    agent_type_id: Uuid,
    service_type_id: Uuid,
) -> AppResult<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM agent_type_service_types WHERE agent_type_id = $1 AND service_type_id = $2",
    )
    .bind(agent_type_id)
    .bind(service_type_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE agent_type_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("agent type is in use by agents".into()));
    }
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query("DELETE FROM agent_type_service_types WHERE agent_type_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM agent_types WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    expect_updated(result)?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(())
}
