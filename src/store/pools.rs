use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServicePoolSet {
    pub id: Uuid,
    pub name: String,
    pub provider_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServicePool {
    pub id: Uuid,
    pub set_id: Uuid,
    pub name: String,
    /// Pool type referenced by schema pool properties (e.g. `ipv4`).
    pub pool_type: String,
    pub property_type: String,
    pub generator_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServicePoolValue {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub name: String,
    pub value: Value,
    pub service_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub static SET_SPEC: EntitySpec = EntitySpec {
    table: "service_pool_sets",
    columns: "id, name, provider_id, created_at",
    filters: &[
        FilterField {
            name: "name",
            column: "name",
            kind: FilterKind::Contains,
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

pub static POOL_SPEC: EntitySpec = EntitySpec {
    table: "service_pools",
    columns: "id, set_id, name, pool_type, property_type, generator_type, created_at",
    filters: &[
        FilterField {
            name: "setId",
            column: "set_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "poolType",
            column: "pool_type",
            kind: FilterKind::Exact,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some("(SELECT provider_id FROM service_pool_sets s WHERE s.id = service_pools.set_id)"),
        consumer: None,
        agent: None,
    },
    default_sort: "id",
};

pub static VALUE_SPEC: EntitySpec = EntitySpec {
    table: "service_pool_values",
    columns: "id, pool_id, name, value, service_id, created_at",
    filters: &[
        FilterField {
            name: "poolId",
            column: "pool_id",
            kind: FilterKind::Id,
        },
        FilterField {
            name: "serviceId",
            column: "service_id",
            kind: FilterKind::Id,
        },
    ],
    scope: ScopeColumns {
        participant: None,
        provider: Some(
            "(SELECT s.provider_id FROM service_pool_sets s \
              JOIN service_pools p ON p.set_id = s.id \
              WHERE p.id = service_pool_values.pool_id)",
        ),
        consumer: None,
        agent: None,
    },
    default_sort: "name",
};

pub async fn create_set(pool: &PgPool, name: &str, provider_id: Uuid) -> AppResult<ServicePoolSet> {
    let set = sqlx::query_as::<_, ServicePoolSet>(
        "INSERT INTO service_pool_sets (id, name, provider_id, created_at) \
         VALUES ($1, $2, $3, NOW()) RETURNING id, name, provider_id, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(provider_id)
    .fetch_one(pool)
    .await?;
    Ok(set)
}

pub async fn get_set(pool: &PgPool, id: Uuid) -> AppResult<ServicePoolSet> {
    sqlx::query_as::<_, ServicePoolSet>(
        "SELECT id, name, provider_id, created_at FROM service_pool_sets WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn delete_set(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_pools WHERE set_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("pool set still contains pools".into()));
    }
    let result = sqlx::query("DELETE FROM service_pool_sets WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

pub struct NewPool {
    pub set_id: Uuid,
    pub name: String,
    pub pool_type: String,
    pub property_type: String,
    pub generator_type: String,
}

pub async fn create_pool(pool: &PgPool, new: &NewPool) -> AppResult<ServicePool> {
    let created = sqlx::query_as::<_, ServicePool>(
        "INSERT INTO service_pools (id, set_id, name, pool_type, property_type, generator_type, \
         created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
         RETURNING id, set_id, name, pool_type, property_type, generator_type, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(new.set_id)
    .bind(&new.name)
    .bind(&new.pool_type)
    .bind(&new.property_type)
    .bind(&new.generator_type)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn get_pool(pool: &PgPool, id: Uuid) -> AppResult<ServicePool> {
    sqlx::query_as::<_, ServicePool>(
        "SELECT id, set_id, name, pool_type, property_type, generator_type, created_at \
         FROM service_pools WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn delete_pool(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let allocated: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM service_pool_values WHERE pool_id = $1 AND service_id IS NOT NULL",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if allocated > 0 {
        return Err(AppError::Conflict("pool has allocated values".into()));
    }
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query("DELETE FROM service_pool_values WHERE pool_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM service_pools WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    expect_updated(result)?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(())
}

pub async fn create_value(
    pool: &PgPool,
    pool_id: Uuid,
    name: &str,
    value: &Value,
) -> AppResult<ServicePoolValue> {
    let created = sqlx::query_as::<_, ServicePoolValue>(
        "INSERT INTO service_pool_values (id, pool_id, name, value, created_at) \
         VALUES ($1, $2, $3, $4, NOW()) \
         RETURNING id, pool_id, name, value, service_id, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(pool_id)
    .bind(name)
    .bind(value)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn delete_value(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let value = sqlx::query_as::<_, ServicePoolValue>(
        "SELECT id, pool_id, name, value, service_id, created_at \
         FROM service_pool_values WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)?;
    if value.service_id.is_some() {
        return Err(AppError::Conflict("pool value is allocated to a service".into()));
    }
    let result = sqlx::query("DELETE FROM service_pool_values WHERE id = $1 AND service_id IS NULL")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

/// The pool of the given type inside an agent's pool set.
pub async fn find_pool_by_type(
    conn: &mut PgConnection,
    set_id: Uuid,
    pool_type: &str,
) -> AppResult<ServicePool> {
    sqlx::query_as::<_, ServicePool>(
        "SELECT id, set_id, name, pool_type, property_type, generator_type, created_at \
         FROM service_pools WHERE set_id = $1 AND pool_type = $2",
    )
    .bind(set_id)
    .bind(pool_type)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::PoolExhausted(format!("no pool of type {pool_type} in set")))
}

/// Allocates the first free value, by name, under a row lock. Concurrent
/// allocators of the same pool serialize on that lock; the loser re-reads
/// the predicate and moves on to the next free row or exhausts.
pub async fn allocate_value(
    conn: &mut PgConnection,
    pool_id: Uuid,
    service_id: Uuid,
) -> AppResult<ServicePoolValue> {
    let free = sqlx::query_as::<_, ServicePoolValue>(
        "SELECT id, pool_id, name, value, service_id, created_at \
         FROM service_pool_values \
         WHERE pool_id = $1 AND service_id IS NULL \
         ORDER BY name ASC LIMIT 1 FOR UPDATE",
    )
    .bind(pool_id)
    .fetch_optional(&mut *conn)
    .await?;
    let free = free.ok_or_else(|| AppError::PoolExhausted(format!("pool {pool_id} has no free values")))?;
    let allocated = sqlx::query_as::<_, ServicePoolValue>(
        "UPDATE service_pool_values SET service_id = $2 WHERE id = $1 \
         RETURNING id, pool_id, name, value, service_id, created_at",
    )
    .bind(free.id)
    .bind(service_id)
    .fetch_one(conn)
    .await?;
    Ok(allocated)
}

/// Frees every value held by a deleted service; returns the count.
pub async fn release_for_service(conn: &mut PgConnection, service_id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("UPDATE service_pool_values SET service_id = NULL WHERE service_id = $1")
        .bind(service_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
