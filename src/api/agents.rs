use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::commander::Commander;
use crate::error::AppResult;
use crate::identity::{Identity, ObjectScope};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::agents::{self, Agent, AgentPatch, NewAgent};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgent {
    pub name: String,
    pub provider_id: Uuid,
    pub agent_type_id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    pub configuration: Option<Value>,
    pub service_pool_set_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateAgent {
    pub name: Option<String>,
    pub status: Option<String>,
    pub tags: Option<Vec<String>>,
    pub configuration: Option<Value>,
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Agent>>> {
    authorize(&identity, Action::Read, ObjectType::Agent, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &agents::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Agent>> {
    let agent = agents::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Agent,
        Some(&ObjectScope {
            provider_id: Some(agent.provider_id),
            agent_id: Some(agent.id),
            ..Default::default()
        }),
    )?;
    Ok(Json(agent))
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateAgent>,
) -> AppResult<(StatusCode, Json<Agent>)> {
    authorize(
        &identity,
        Action::Create,
        ObjectType::Agent,
        Some(&ObjectScope::provider(payload.provider_id)),
    )?;
    let agent = agents::create(
        &pool,
        &NewAgent {
            name: payload.name,
            provider_id: payload.provider_id,
            agent_type_id: payload.agent_type_id,
            tags: payload.tags,
            configuration: payload.configuration,
            service_pool_set_id: payload.service_pool_set_id,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn update(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAgent>,
) -> AppResult<Json<Agent>> {
    let updated = commander
        .update_agent(
            &identity,
            id,
            &AgentPatch {
                name: payload.name,
                status: payload.status,
                tags: payload.tags,
                configuration: payload.configuration,
            },
        )
        .await?;
    Ok(Json(updated))
}

pub async fn remove(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let agent = agents::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Delete,
        ObjectType::Agent,
        Some(&ObjectScope::provider(agent.provider_id)),
    )?;
    agents::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
