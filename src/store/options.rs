use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptionType {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A provider-offered choice; its value must satisfy the schema validators
/// of whatever property references it.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOption {
    pub id: Uuid,
    pub option_type_id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

pub static TYPE_SPEC: EntitySpec = EntitySpec {
    table: "service_option_types",
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

pub static OPTION_SPEC: EntitySpec = EntitySpec {
    table: "service_options",
    columns: "id, option_type_id, provider_id, name, value, created_at",
    filters: &[
        FilterField {
            name: "name",
            column: "name",
            kind: FilterKind::Contains,
        },
        FilterField {
            name: "optionTypeId",
            column: "option_type_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "providerId",
            column: "provider_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("provider_id"),
        consumer: None,
        agent: None,
    },
    default_sort: "id",
};

pub async fn create_type(pool: &PgPool, name: &str) -> AppResult<ServiceOptionType> {
    let created = sqlx::query_as::<_, ServiceOptionType>(
        "INSERT INTO service_option_types (id, name, created_at) VALUES ($1, $2, NOW()) \
         RETURNING id, name, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn get_type(pool: &PgPool, id: Uuid) -> AppResult<ServiceOptionType> {
    sqlx::query_as::<_, ServiceOptionType>(
        "SELECT id, name, created_at FROM service_option_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn delete_type(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM service_options WHERE option_type_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("option type has options".into()));
    }
    let result = sqlx::query("DELETE FROM service_option_types WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

pub async fn create_option(
    pool: &PgPool,
    option_type_id: Uuid,
    provider_id: Uuid,
    name: &str,
    value: &Value,
) -> AppResult<ServiceOption> {
    let created = sqlx::query_as::<_, ServiceOption>(
        "INSERT INTO service_options (id, option_type_id, provider_id, name, value, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) \
         RETURNING id, option_type_id, provider_id, name, value, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(option_type_id)
    .bind(provider_id)
    .bind(name)
    .bind(value)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn get_option(pool: &PgPool, id: Uuid) -> AppResult<ServiceOption> {
    sqlx::query_as::<_, ServiceOption>(
        "SELECT id, option_type_id, provider_id, name, value, created_at \
         FROM service_options WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn delete_option(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM service_options WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}
