use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

pub const STATUS_NEW: &str = "new";
pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_DISCONNECTED: &str = "disconnected";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_DISABLED: &str = "disabled";

pub fn check_status(status: &str) -> AppResult<()> {
    match status {
        STATUS_NEW | STATUS_CONNECTED | STATUS_DISCONNECTED | STATUS_ERROR | STATUS_DISABLED => {
            Ok(())
        }
        other => Err(AppError::BadRequest(format!("unknown agent status: {other}"))),
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub provider_id: Uuid,
    pub agent_type_id: Uuid,
    pub status: String,
    pub last_status_update: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub configuration: Option<Value>,
    pub service_pool_set_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, provider_id, agent_type_id, status, last_status_update, \
                       tags, configuration, service_pool_set_id, created_at, updated_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "agents",
    columns: "id, name, provider_id, agent_type_id, status, last_status_update, \
              tags, configuration, service_pool_set_id, created_at, updated_at",
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
        FilterField {
            name: "providerId",
            column: "provider_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "agentTypeId",
            column: "agent_type_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("provider_id"),
        consumer: None,
        agent: Some("id"),
    },
    default_sort: "id",
};

pub struct NewAgent {
    pub name: String,
    pub provider_id: Uuid,
    pub agent_type_id: Uuid,
    pub tags: Vec<String>,
    pub configuration: Option<Value>,
    pub service_pool_set_id: Option<Uuid>,
}

pub async fn create(pool: &PgPool, new: &NewAgent) -> AppResult<Agent> {
    let agent = sqlx::query_as::<_, Agent>(&format!(
        "INSERT INTO agents (id, name, provider_id, agent_type_id, status, tags, configuration, \
         service_pool_set_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW()) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(&new.name)
    .bind(new.provider_id)
    .bind(new.agent_type_id)
    .bind(STATUS_NEW)
    .bind(&new.tags)
    .bind(&new.configuration)
    .bind(new.service_pool_set_id)
    .fetch_one(pool)
    .await?;
    Ok(agent)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Agent> {
    sqlx::query_as::<_, Agent>(&format!("SELECT {COLUMNS} FROM agents WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub struct AgentPatch {
    pub name: Option<String>,
    pub status: Option<String>,
    pub tags: Option<Vec<String>>,
    pub configuration: Option<Value>,
}

pub async fn update(conn: &mut PgConnection, id: Uuid, patch: &AgentPatch) -> AppResult<Agent> {
    if let Some(status) = &patch.status {
        check_status(status)?;
    }
    let agent = sqlx::query_as::<_, Agent>(&format!(
        "UPDATE agents SET \
         name = COALESCE($2, name), \
         status = COALESCE($3, status), \
         last_status_update = CASE WHEN $3 IS NULL THEN last_status_update ELSE NOW() END, \
         tags = COALESCE($4, tags), \
         configuration = COALESCE($5, configuration), \
         updated_at = NOW() \
         WHERE id = $1 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(&patch.name)
    .bind(&patch.status)
    .bind(&patch.tags)
    .bind(&patch.configuration)
    .fetch_optional(conn)
    .await?;
    agent.ok_or(AppError::NotFound)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE agent_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("agent still owns services".into()));
    }
    let result = sqlx::query("DELETE FROM agents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

/// Agents whose agent type supports the service type and whose tags contain
/// every required tag.
pub async fn find_by_service_type_and_tags(
    pool: &PgPool,
    service_type_id: Uuid,
    required_tags: &[String],
) -> AppResult<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>(&format!(
        "SELECT {COLUMNS} FROM agents \
         WHERE agent_type_id IN ( \
             SELECT agent_type_id FROM agent_type_service_types WHERE service_type_id = $1) \
         AND tags @> $2 \
         ORDER BY id ASC"
    ))
    .bind(service_type_id)
    .bind(required_tags)
    .fetch_all(pool)
    .await?;
    Ok(agents)
}

/// Marks a successful job claim: the agent is live.
pub async fn touch_connected(conn: &mut PgConnection, id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE agents SET status = $2, last_status_update = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status <> $3",
    )
    .bind(id)
    .bind(STATUS_CONNECTED)
    .bind(STATUS_DISABLED)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DisconnectedAgent {
    pub id: Uuid,
    pub provider_id: Uuid,
}

/// Flips every connected agent silent for longer than `threshold` to
/// disconnected; returns the affected agents for event emission.
pub async fn mark_inactive_as_disconnected(
    conn: &mut PgConnection,
    threshold: Duration,
) -> AppResult<Vec<DisconnectedAgent>> {
    let cutoff = Utc::now() - threshold;
    let affected = sqlx::query_as::<_, DisconnectedAgent>(
        "UPDATE agents SET status = $1, updated_at = NOW() \
         WHERE status = $2 AND (last_status_update IS NULL OR last_status_update < $3) \
         RETURNING id, provider_id",
    )
    .bind(STATUS_DISCONNECTED)
    .bind(STATUS_CONNECTED)
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(affected)
}
