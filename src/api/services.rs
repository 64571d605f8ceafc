use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::commander::{Commander, CreateServiceInput};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::policy::{authorize, Action, ObjectType};
use crate::store::jobs::Job;
use crate::store::services::{self, Service};
use crate::store::{events, list_page, service_types, Page};

use super::page_req;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateService {
    pub name: String,
    #[serde(rename = "typeId")]
    pub service_type_id: Uuid,
    pub group_id: Uuid,
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Deserialize)]
pub struct UpdateProperties {
    pub properties: Value,
}

#[derive(Deserialize)]
pub struct ExecuteAction {
    pub action: String,
    pub priority: Option<i32>,
}

#[derive(Deserialize)]
pub struct UptimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeReport {
    pub uptime_seconds: i64,
    pub downtime_seconds: i64,
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Service>>> {
    authorize(&identity, Action::Read, ObjectType::Service, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &services::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Service>> {
    let service = services::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Service,
        Some(&service.scope()),
    )?;
    Ok(Json(service))
}

pub async fn create(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Json(payload): Json<CreateService>,
) -> AppResult<(StatusCode, Json<Service>)> {
    let properties = if payload.properties.is_null() {
        Value::Object(Default::default())
    } else {
        payload.properties
    };
    let service = commander
        .create_service(
            &identity,
            CreateServiceInput {
                name: payload.name,
                service_type_id: payload.service_type_id,
                group_id: payload.group_id,
                agent_id: payload.agent_id,
                tags: payload.tags,
                properties,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn update_properties(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProperties>,
) -> AppResult<Json<Service>> {
    let service = commander
        .update_service_properties(&identity, id, &payload.properties)
        .await?;
    Ok(Json(service))
}

pub async fn execute_action(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<ExecuteAction>,
) -> AppResult<(StatusCode, Json<Job>)> {
    if payload.action.trim().is_empty() {
        return Err(AppError::BadRequest("action is required".into()));
    }
    let job = commander
        .execute_action(&identity, id, &payload.action, payload.priority)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn remove(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    commander.delete_service(&identity, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn uptime(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Query(window): Query<UptimeWindow>,
) -> AppResult<Json<UptimeReport>> {
    let service = services::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Service,
        Some(&service.scope()),
    )?;
    let service_type = service_types::get_by_id(&pool, service.service_type_id).await?;
    let lifecycle = service_type.lifecycle()?;
    let (uptime_seconds, downtime_seconds) = events::service_uptime(
        &pool,
        service.id,
        window.start,
        window.end,
        &lifecycle.running_states,
    )
    .await?;
    Ok(Json(UptimeReport {
        uptime_seconds,
        downtime_seconds,
    }))
}
