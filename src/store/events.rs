use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::store::{EntitySpec, FilterField, FilterKind, ScopeColumns};

pub const TYPE_SERVICE_CREATED: &str = "ServiceCreated";
pub const TYPE_SERVICE_PROPERTIES_UPDATED: &str = "ServicePropertiesUpdated";
pub const TYPE_SERVICE_ACTION_REQUESTED: &str = "ServiceActionRequested";
pub const TYPE_SERVICE_TRANSITIONED: &str = "ServiceTransitioned";
pub const TYPE_SERVICE_DELETED: &str = "ServiceDeleted";
pub const TYPE_JOB_CLAIMED: &str = "JobClaimed";
pub const TYPE_JOB_FAILED: &str = "JobFailed";
pub const TYPE_AGENT_STATUS_CHANGED: &str = "AgentStatusChanged";
pub const TYPE_AGENT_DISCONNECTED: &str = "AgentDisconnected";

pub const INITIATOR_USER: &str = "user";
pub const INITIATOR_AGENT: &str = "agent";
pub const INITIATOR_SYSTEM: &str = "system";

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub sequence_number: i64,
    pub initiator_type: String,
    pub initiator_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub entity_id: Option<Uuid>,
    pub payload: Value,
    pub provider_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub consumer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, sequence_number, initiator_type, initiator_id, event_type, \
                       entity_id, payload, provider_id, agent_id, consumer_id, created_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "events",
    columns: "id, sequence_number, initiator_type, initiator_id, event_type, \
              entity_id, payload, provider_id, agent_id, consumer_id, created_at",
    filters: &[
        FilterField {
            name: "type",
            column: "event_type",
            kind: FilterKind::Exact,
        },
        FilterField {
            name: "entityId",
            column: "entity_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "initiatorType",
            column: "initiator_type",
            kind: FilterKind::Exact,
        },
        FilterField {
            name: "agentId",
            column: "agent_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("provider_id"),
        consumer: Some("consumer_id"),
        agent: Some("agent_id"),
    },
    default_sort: "sequence_number",
};

pub struct NewEvent {
    pub initiator_type: &'static str,
    pub initiator_id: Option<Uuid>,
    pub event_type: &'static str,
    pub entity_id: Option<Uuid>,
    pub payload: Value,
    pub provider_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub consumer_id: Option<Uuid>,
}

impl NewEvent {
    pub fn from_identity(identity: &Identity, event_type: &'static str) -> Self {
        let initiator_type = match identity.role {
            crate::identity::Role::Agent => INITIATOR_AGENT,
            _ => INITIATOR_USER,
        };
        Self {
            initiator_type,
            initiator_id: Some(identity.id),
            event_type,
            entity_id: None,
            payload: Value::Null,
            provider_id: None,
            agent_id: None,
            consumer_id: None,
        }
    }

    pub fn system(event_type: &'static str) -> Self {
        Self {
            initiator_type: INITIATOR_SYSTEM,
            initiator_id: None,
            event_type,
            entity_id: None,
            payload: Value::Null,
            provider_id: None,
            agent_id: None,
            consumer_id: None,
        }
    }
}

/// Appends one event inside the caller's transaction. The sequence counter
/// row is updated first: its row lock serializes concurrent appenders, so
/// commit order equals sequence order and a rollback consumes nothing.
pub async fn append(conn: &mut PgConnection, new: &NewEvent) -> AppResult<Event> {
    let sequence_number: i64 =
        sqlx::query_scalar("UPDATE event_sequence SET value = value + 1 RETURNING value")
            .fetch_one(&mut *conn)
            .await?;
    let event = sqlx::query_as::<_, Event>(&format!(
        "INSERT INTO events (id, sequence_number, initiator_type, initiator_id, event_type, \
         entity_id, payload, provider_id, agent_id, consumer_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(sequence_number)
    .bind(new.initiator_type)
    .bind(new.initiator_id)
    .bind(new.event_type)
    .bind(new.entity_id)
    .bind(&new.payload)
    .bind(new.provider_id)
    .bind(new.agent_id)
    .bind(new.consumer_id)
    .fetch_one(conn)
    .await?;
    Ok(event)
}

/// Events strictly after `from_sequence`, ascending.
pub async fn list_from_sequence(
    pool: &PgPool,
    from_sequence: i64,
    limit: i64,
) -> AppResult<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(&format!(
        "SELECT {COLUMNS} FROM events WHERE sequence_number > $1 \
         ORDER BY sequence_number ASC LIMIT $2"
    ))
    .bind(from_sequence)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Event> {
    sqlx::query_as::<_, Event>(&format!("SELECT {COLUMNS} FROM events WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// Status carried by a transition event's diff (`path = /status`).
pub fn transition_status(payload: &Value) -> Option<&str> {
    payload
        .get("diff")?
        .as_array()?
        .iter()
        .find(|op| op.get("path").and_then(Value::as_str) == Some("/status"))?
        .get("value")?
        .as_str()
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    payload: Value,
    created_at: DateTime<Utc>,
}

/// Wall-clock seconds the service spent in and out of running states during
/// `[start, end]`, reconstructed from its transition events. The two parts
/// always sum to the window length.
pub async fn service_uptime(
    pool: &PgPool,
    service_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    running_states: &[String],
) -> AppResult<(i64, i64)> {
    if end <= start {
        return Err(AppError::BadRequest("uptime window is empty".into()));
    }
    let seed: Option<TransitionRow> = sqlx::query_as(
        "SELECT payload, created_at FROM events \
         WHERE entity_id = $1 AND event_type = $2 AND created_at <= $3 \
         ORDER BY sequence_number DESC LIMIT 1",
    )
    .bind(service_id)
    .bind(TYPE_SERVICE_TRANSITIONED)
    .bind(start)
    .fetch_optional(pool)
    .await?;
    let transitions: Vec<TransitionRow> = sqlx::query_as(
        "SELECT payload, created_at FROM events \
         WHERE entity_id = $1 AND event_type = $2 AND created_at > $3 AND created_at <= $4 \
         ORDER BY sequence_number ASC",
    )
    .bind(service_id)
    .bind(TYPE_SERVICE_TRANSITIONED)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let is_running = |payload: &Value| {
        transition_status(payload)
            .map(|status| running_states.iter().any(|s| s == status))
            .unwrap_or(false)
    };
    let mut running = seed.map(|row| is_running(&row.payload)).unwrap_or(false);
    let mut cursor = start;
    let mut uptime = 0i64;
    for row in transitions {
        let elapsed = (row.created_at - cursor).num_seconds();
        if running {
            uptime += elapsed;
        }
        running = is_running(&row.payload);
        cursor = row.created_at;
    }
    let tail = (end - cursor).num_seconds();
    if running {
        uptime += tail;
    }
    let total = (end - start).num_seconds();
    Ok((uptime, total - uptime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transition_status_reads_the_status_op() {
        let payload = json!({"diff": [
            {"op": "replace", "path": "/updatedAt", "value": "x"},
            {"op": "replace", "path": "/status", "value": "Running"}
        ]});
        assert_eq!(transition_status(&payload), Some("Running"));
        assert_eq!(transition_status(&json!({"diff": []})), None);
        assert_eq!(transition_status(&json!({})), None);
    }
}
