use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::ObjectScope;
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub service_type_id: Uuid,
    pub group_id: Uuid,
    pub agent_id: Uuid,
    pub provider_id: Uuid,
    pub consumer_id: Uuid,
    pub status: String,
    pub properties: Value,
    pub agent_instance_id: Option<String>,
    pub agent_instance_data: Option<Value>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn scope(&self) -> ObjectScope {
        ObjectScope {
            participant_id: None,
            provider_id: Some(self.provider_id),
            consumer_id: Some(self.consumer_id),
            agent_id: Some(self.agent_id),
        }
    }
}

const COLUMNS: &str = "id, name, service_type_id, group_id, agent_id, provider_id, consumer_id, \
                       status, properties, agent_instance_id, agent_instance_data, failed_at, \
                       created_at, updated_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "services",
    columns: "id, name, service_type_id, group_id, agent_id, provider_id, consumer_id, \
              status, properties, agent_instance_id, agent_instance_data, failed_at, \
              created_at, updated_at",
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
            name: "serviceTypeId",
            column: "service_type_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "groupId",
            column: "group_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "agentId",
            column: "agent_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "providerId",
            column: "provider_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "consumerId",
            column: "consumer_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("provider_id"),
        consumer: Some("consumer_id"),
        agent: Some("agent_id"),
    },
    default_sort: "id",
};

pub struct NewService {
    pub name: String,
    pub service_type_id: Uuid,
    pub group_id: Uuid,
    pub agent_id: Uuid,
    pub provider_id: Uuid,
    pub consumer_id: Uuid,
    pub status: String,
    pub properties: Value,
}

pub async fn insert(conn: &mut PgConnection, new: &NewService) -> AppResult<Service> {
    let service = sqlx::query_as::<_, Service>(&format!(
        "INSERT INTO services (id, name, service_type_id, group_id, agent_id, provider_id, \
         consumer_id, status, properties, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(&new.name)
    .bind(new.service_type_id)
    .bind(new.group_id)
    .bind(new.agent_id)
    .bind(new.provider_id)
    .bind(new.consumer_id)
    .bind(&new.status)
    .bind(&new.properties)
    .fetch_one(conn)
    .await?;
    Ok(service)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Service> {
    sqlx::query_as::<_, Service>(&format!("SELECT {COLUMNS} FROM services WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// Row-locked read inside a mutation transaction.
pub async fn get_for_update(conn: &mut PgConnection, id: Uuid) -> AppResult<Service> {
    sqlx::query_as::<_, Service>(&format!(
        "SELECT {COLUMNS} FROM services WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn update_properties(
    conn: &mut PgConnection,
    id: Uuid,
    properties: &Value,
) -> AppResult<()> {
    let result =
        sqlx::query("UPDATE services SET properties = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(properties)
            .execute(conn)
            .await?;
    expect_updated(result)
}

pub struct TransitionUpdate {
    pub status: String,
    pub properties: Option<Value>,
    pub agent_instance_id: Option<String>,
    pub agent_instance_data: Option<Value>,
    pub failed_at: Option<DateTime<Utc>>,
}

pub async fn apply_transition(
    conn: &mut PgConnection,
    id: Uuid,
    update: &TransitionUpdate,
) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE services SET status = $2, \
         properties = COALESCE($3, properties), \
         agent_instance_id = COALESCE($4, agent_instance_id), \
         agent_instance_data = COALESCE($5, agent_instance_data), \
         failed_at = $6, \
         updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(&update.status)
    .bind(&update.properties)
    .bind(&update.agent_instance_id)
    .bind(&update.agent_instance_data)
    .bind(update.failed_at)
    .execute(conn)
    .await?;
    expect_updated(result)
}

pub async fn delete(conn: &mut PgConnection, id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM jobs WHERE service_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    expect_updated(result)
}
