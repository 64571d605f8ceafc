use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::identity::{Identity, ObjectScope};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::agent_types::{self, AgentType};
use crate::store::options::{self, ServiceOption, ServiceOptionType};
use crate::store::service_types::{self, ServiceType};
use crate::store::{list_page, Page};

use super::page_req;

// --- agent types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentType {
    pub name: String,
    #[serde(default)]
    pub service_type_ids: Vec<Uuid>,
}

pub async fn list_agent_types(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<AgentType>>> {
    authorize(&identity, Action::Read, ObjectType::AgentType, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &agent_types::SPEC, &identity, &req).await?))
}

pub async fn get_agent_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AgentType>> {
    authorize(&identity, Action::Read, ObjectType::AgentType, None)?;
    Ok(Json(agent_types::get_by_id(&pool, id).await?))
}

pub async fn create_agent_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateAgentType>,
) -> AppResult<(StatusCode, Json<AgentType>)> {
    authorize(&identity, Action::Create, ObjectType::AgentType, None)?;
    let created = agent_types::create(&pool, &payload.name, &payload.service_type_ids).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_agent_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::AgentType, None)?;
    agent_types::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- service types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceType {
    pub name: String,
    pub property_schema: Value,
    pub lifecycle_schema: Value,
}

pub async fn list_service_types(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServiceType>>> {
    authorize(&identity, Action::Read, ObjectType::ServiceType, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &service_types::SPEC, &identity, &req).await?))
}

pub async fn get_service_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceType>> {
    authorize(&identity, Action::Read, ObjectType::ServiceType, None)?;
    Ok(Json(service_types::get_by_id(&pool, id).await?))
}

pub async fn create_service_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateServiceType>,
) -> AppResult<(StatusCode, Json<ServiceType>)> {
    authorize(&identity, Action::Create, ObjectType::ServiceType, None)?;
    let created = service_types::create(
        &pool,
        &payload.name,
        &payload.property_schema,
        &payload.lifecycle_schema,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_service_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServiceType, None)?;
    service_types::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- option types and options ---

#[derive(Deserialize)]
pub struct CreateOptionType {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOption {
    pub option_type_id: Uuid,
    pub provider_id: Uuid,
    pub name: String,
    pub value: Value,
}

pub async fn list_option_types(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServiceOptionType>>> {
    authorize(&identity, Action::Read, ObjectType::ServiceOptionType, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &options::TYPE_SPEC, &identity, &req).await?))
}

pub async fn get_option_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceOptionType>> {
    authorize(&identity, Action::Read, ObjectType::ServiceOptionType, None)?;
    Ok(Json(options::get_type(&pool, id).await?))
}

pub async fn create_option_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateOptionType>,
) -> AppResult<(StatusCode, Json<ServiceOptionType>)> {
    authorize(&identity, Action::Create, ObjectType::ServiceOptionType, None)?;
    let created = options::create_type(&pool, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_option_type(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServiceOptionType, None)?;
    options::delete_type(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_options(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServiceOption>>> {
    authorize(&identity, Action::Read, ObjectType::ServiceOption, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &options::OPTION_SPEC, &identity, &req).await?))
}

pub async fn get_option(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceOption>> {
    let option = options::get_option(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::ServiceOption,
        Some(&ObjectScope::provider(option.provider_id)),
    )?;
    Ok(Json(option))
}

pub async fn create_option(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateOption>,
) -> AppResult<(StatusCode, Json<ServiceOption>)> {
    authorize(&identity, Action::Create, ObjectType::ServiceOption, None)?;
    let created = options::create_option(
        &pool,
        payload.option_type_id,
        payload.provider_id,
        &payload.name,
        &payload.value,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_option(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServiceOption, None)?;
    options::delete_option(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
