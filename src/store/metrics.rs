use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, Page, PageReq, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MetricType {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MetricEntry {
    pub id: Uuid,
    pub metric_type_id: Uuid,
    pub agent_id: Uuid,
    pub service_id: Option<Uuid>,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

pub static TYPE_SPEC: EntitySpec = EntitySpec {
    table: "metric_types",
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

pub async fn create_type(pool: &PgPool, name: &str) -> AppResult<MetricType> {
    let created = sqlx::query_as::<_, MetricType>(
        "INSERT INTO metric_types (id, name, created_at) VALUES ($1, $2, NOW()) \
         RETURNING id, name, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn get_type(pool: &PgPool, id: Uuid) -> AppResult<MetricType> {
    sqlx::query_as::<_, MetricType>("SELECT id, name, created_at FROM metric_types WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn delete_type(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM metric_types WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

pub struct NewMetricEntry {
    pub metric_type_id: Uuid,
    pub agent_id: Uuid,
    pub service_id: Option<Uuid>,
    pub value: f64,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Write-only sink for agent-reported measurements; the telemetry database
/// stays behind this seam.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record(&self, entry: &NewMetricEntry) -> AppResult<MetricEntry>;
    async fn list(&self, req: &PageReq) -> AppResult<Page<MetricEntry>>;
}

pub struct PgMetricSink {
    pool: PgPool,
}

impl PgMetricSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "id, metric_type_id, agent_id, service_id, value, recorded_at";

#[async_trait]
impl MetricSink for PgMetricSink {
    async fn record(&self, entry: &NewMetricEntry) -> AppResult<MetricEntry> {
        let recorded = sqlx::query_as::<_, MetricEntry>(&format!(
            "INSERT INTO metric_entries (id, metric_type_id, agent_id, service_id, value, \
             recorded_at) VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW())) \
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(entry.metric_type_id)
        .bind(entry.agent_id)
        .bind(entry.service_id)
        .bind(entry.value)
        .bind(entry.recorded_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(recorded)
    }

    async fn list(&self, req: &PageReq) -> AppResult<Page<MetricEntry>> {
        let page = req.page.max(1);
        let page_size = req.page_size.clamp(1, super::MAX_PAGE_SIZE);
        let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)?;
        let items = sqlx::query_as::<_, MetricEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM metric_entries ORDER BY recorded_at DESC \
             LIMIT $1 OFFSET $2"
        ))
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + page_size - 1) / page_size
        };
        Ok(Page {
            items,
            total_items,
            total_pages,
            current_page: page,
            has_next: page < total_pages,
            has_prev: page > 1 && total_pages > 0,
        })
    }
}
