use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub service_id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub status: String,
    pub priority: i32,
    pub payload: Option<Value>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, service_id, agent_id, action, status, priority, payload, \
                       claimed_at, completed_at, error_message, created_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "jobs",
    columns: "id, service_id, agent_id, action, status, priority, payload, \
              claimed_at, completed_at, error_message, created_at",
    filters: &[
        FilterField {
            name: "status",
            column: "status",
            kind: FilterKind::Exact,
        },
        FilterField {
            name: "action",
            column: "action",
            kind: FilterKind::Exact,
        },
        FilterField {
            name: "agentId",
            column: "agent_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "serviceId",
            column: "service_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "priority",
            column: "priority",
            kind: FilterKind::Int,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("(SELECT provider_id FROM services WHERE services.id = jobs.service_id)"),
        consumer: Some("(SELECT consumer_id FROM services WHERE services.id = jobs.service_id)"),
        agent: Some("agent_id"),
    },
    default_sort: "id",
};

pub struct NewJob {
    pub service_id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub priority: i32,
    pub payload: Option<Value>,
}

pub async fn insert(conn: &mut PgConnection, new: &NewJob) -> AppResult<Job> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "INSERT INTO jobs (id, service_id, agent_id, action, status, priority, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(new.service_id)
    .bind(new.agent_id)
    .bind(&new.action)
    .bind(STATUS_PENDING)
    .bind(new.priority)
    .bind(&new.payload)
    .fetch_one(conn)
    .await?;
    Ok(job)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Job> {
    sqlx::query_as::<_, Job>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn get_for_update(conn: &mut PgConnection, id: Uuid) -> AppResult<Job> {
    sqlx::query_as::<_, Job>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound)
}

/// Claim candidates for one agent: among pending jobs whose service group
/// has nothing processing on this agent, the single best job per group
/// (priority descending, oldest first), capped by `limit`.
pub async fn pending_for_agent(
    conn: &mut PgConnection,
    agent_id: Uuid,
    limit: i64,
) -> AppResult<Vec<Job>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let jobs = sqlx::query_as::<_, Job>(
        "WITH busy_groups AS ( \
             SELECT DISTINCT s.group_id FROM jobs j \
             JOIN services s ON s.id = j.service_id \
             WHERE j.agent_id = $1 AND j.status = 'processing' \
         ), ranked AS ( \
             SELECT j.id, ROW_NUMBER() OVER ( \
                 PARTITION BY s.group_id \
                 ORDER BY j.priority DESC, j.created_at ASC) AS rank \
             FROM jobs j \
             JOIN services s ON s.id = j.service_id \
             WHERE j.agent_id = $1 AND j.status = 'pending' \
               AND s.group_id NOT IN (SELECT group_id FROM busy_groups) \
         ) \
         SELECT id, service_id, agent_id, action, status, priority, payload, \
                claimed_at, completed_at, error_message, created_at \
         FROM jobs WHERE id IN (SELECT id FROM ranked WHERE rank = 1) \
         ORDER BY priority DESC, created_at ASC \
         LIMIT $2",
    )
    .bind(agent_id)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(jobs)
}

/// Compare-and-set into processing; a job already taken is skipped.
pub async fn mark_processing(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Job>> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "UPDATE jobs SET status = $2, claimed_at = NOW() \
         WHERE id = $1 AND status = $3 RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(STATUS_PROCESSING)
    .bind(STATUS_PENDING)
    .fetch_optional(conn)
    .await?;
    Ok(job)
}

pub async fn mark_completed(conn: &mut PgConnection, id: Uuid) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE jobs SET status = $2, completed_at = NOW(), error_message = NULL WHERE id = $1",
    )
    .bind(id)
    .bind(STATUS_COMPLETED)
    .execute(conn)
    .await?;
    expect_updated(result)
}

pub async fn mark_failed(conn: &mut PgConnection, id: Uuid, error_message: &str) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE jobs SET status = $2, completed_at = NOW(), error_message = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(STATUS_FAILED)
    .bind(error_message)
    .execute(conn)
    .await?;
    expect_updated(result)
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct StuckJob {
    pub id: Uuid,
    pub service_id: Uuid,
    pub action: String,
}

/// Pending or processing jobs older than `threshold`, row-locked for the
/// timeout sweep.
pub async fn stuck_older_than(
    conn: &mut PgConnection,
    threshold: Duration,
) -> AppResult<Vec<StuckJob>> {
    let cutoff = Utc::now() - threshold;
    let jobs = sqlx::query_as::<_, StuckJob>(
        "SELECT id, service_id, action FROM jobs \
         WHERE status IN ('pending', 'processing') AND created_at < $1 \
         ORDER BY created_at ASC \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(jobs)
}

/// Deletes completed and failed jobs past the retention window.
pub async fn delete_finished_before(pool: &PgPool, retention: Duration) -> AppResult<u64> {
    let cutoff = Utc::now() - retention;
    let result = sqlx::query(
        "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
