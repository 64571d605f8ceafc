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
use crate::store::pools::{self, NewPool, ServicePool, ServicePoolSet, ServicePoolValue};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSet {
    pub name: String,
    pub provider_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePool {
    pub set_id: Uuid,
    pub name: String,
    pub pool_type: String,
    pub property_type: String,
    pub generator_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateValue {
    pub pool_id: Uuid,
    pub name: String,
    pub value: Value,
}

pub async fn list_sets(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServicePoolSet>>> {
    authorize(&identity, Action::Read, ObjectType::ServicePoolSet, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &pools::SET_SPEC, &identity, &req).await?))
}

pub async fn get_set(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServicePoolSet>> {
    let set = pools::get_set(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::ServicePoolSet,
        Some(&ObjectScope::provider(set.provider_id)),
    )?;
    Ok(Json(set))
}

pub async fn create_set(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateSet>,
) -> AppResult<(StatusCode, Json<ServicePoolSet>)> {
    authorize(&identity, Action::Create, ObjectType::ServicePoolSet, None)?;
    let set = pools::create_set(&pool, &payload.name, payload.provider_id).await?;
    Ok((StatusCode::CREATED, Json(set)))
}

pub async fn delete_set(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServicePoolSet, None)?;
    pools::delete_set(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_pools(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServicePool>>> {
    authorize(&identity, Action::Read, ObjectType::ServicePool, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &pools::POOL_SPEC, &identity, &req).await?))
}

pub async fn get_pool(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServicePool>> {
    authorize(&identity, Action::Read, ObjectType::ServicePool, None)?;
    Ok(Json(pools::get_pool(&pool, id).await?))
}

pub async fn create_pool(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreatePool>,
) -> AppResult<(StatusCode, Json<ServicePool>)> {
    authorize(&identity, Action::Create, ObjectType::ServicePool, None)?;
    let created = pools::create_pool(
        &pool,
        &NewPool {
            set_id: payload.set_id,
            name: payload.name,
            pool_type: payload.pool_type,
            property_type: payload.property_type,
            generator_type: payload.generator_type,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_pool(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServicePool, None)?;
    pools::delete_pool(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_values(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServicePoolValue>>> {
    authorize(&identity, Action::Read, ObjectType::ServicePoolValue, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &pools::VALUE_SPEC, &identity, &req).await?))
}

pub async fn create_value(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateValue>,
) -> AppResult<(StatusCode, Json<ServicePoolValue>)> {
    authorize(&identity, Action::Create, ObjectType::ServicePoolValue, None)?;
    let created = pools::create_value(&pool, payload.pool_id, &payload.name, &payload.value).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_value(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::ServicePoolValue, None)?;
    pools::delete_value(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
