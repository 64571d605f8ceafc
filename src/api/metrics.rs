use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Role};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::metrics::{self, MetricEntry, MetricSink, MetricType, NewMetricEntry};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
pub struct CreateMetricType {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub metric_type_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub value: f64,
    pub recorded_at: Option<DateTime<Utc>>,
}

pub async fn list_types(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<MetricType>>> {
    authorize(&identity, Action::Read, ObjectType::MetricType, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &metrics::TYPE_SPEC, &identity, &req).await?))
}

pub async fn get_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MetricType>> {
    authorize(&identity, Action::Read, ObjectType::MetricType, None)?;
    Ok(Json(metrics::get_type(&pool, id).await?))
}

pub async fn create_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateMetricType>,
) -> AppResult<(StatusCode, Json<MetricType>)> {
    authorize(&identity, Action::Create, ObjectType::MetricType, None)?;
    let created = metrics::create_type(&pool, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::MetricType, None)?;
    metrics::delete_type(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Agents push measurements; admins may backfill for any agent.
pub async fn record_entry(
    Extension(sink): Extension<Arc<dyn MetricSink>>,
    identity: Identity,
    Json(payload): Json<RecordEntry>,
) -> AppResult<(StatusCode, Json<MetricEntry>)> {
    authorize(&identity, Action::Create, ObjectType::MetricEntry, None)?;
    let agent_id = match identity.role {
        Role::Agent => identity.agent_id.ok_or(AppError::Forbidden)?,
        _ => payload
            .agent_id
            .ok_or_else(|| AppError::BadRequest("agentId is required".into()))?,
    };
    let entry = sink
        .record(&NewMetricEntry {
            metric_type_id: payload.metric_type_id,
            agent_id,
            service_id: payload.service_id,
            value: payload.value,
            recorded_at: payload.recorded_at,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_entries(
    Extension(sink): Extension<Arc<dyn MetricSink>>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<MetricEntry>>> {
    authorize(&identity, Action::Read, ObjectType::MetricEntry, None)?;
    let req = page_req(&params)?;
    Ok(Json(sink.list(&req).await?))
}
