use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::identity::{Identity, ObjectScope, Role};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::groups::{self, ServiceGroup};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    pub name: String,
    /// Defaults to the caller's own participant for tenant identities.
    pub consumer_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateGroup {
    pub name: String,
}

fn consumer_scope(group: &ServiceGroup) -> ObjectScope {
    ObjectScope {
        consumer_id: Some(group.consumer_id),
        ..Default::default()
    }
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<ServiceGroup>>> {
    authorize(&identity, Action::Read, ObjectType::ServiceGroup, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &groups::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceGroup>> {
    let group = groups::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::ServiceGroup,
        Some(&consumer_scope(&group)),
    )?;
    Ok(Json(group))
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateGroup>,
) -> AppResult<(StatusCode, Json<ServiceGroup>)> {
    let consumer_id = match (payload.consumer_id, identity.role) {
        (Some(id), _) => id,
        (None, Role::Participant) => identity.participant_id.unwrap_or_default(),
        (None, _) => {
            return Err(crate::error::AppError::BadRequest(
                "consumerId is required".into(),
            ))
        }
    };
    authorize(
        &identity,
        Action::Create,
        ObjectType::ServiceGroup,
        Some(&ObjectScope {
            consumer_id: Some(consumer_id),
            ..Default::default()
        }),
    )?;
    let group = groups::create(&pool, &payload.name, consumer_id).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateGroup>,
) -> AppResult<Json<ServiceGroup>> {
    let group = groups::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Update,
        ObjectType::ServiceGroup,
        Some(&consumer_scope(&group)),
    )?;
    let updated = groups::rename(&pool, id, &payload.name).await?;
    Ok(Json(updated))
}

pub async fn remove(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let group = groups::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Delete,
        ObjectType::ServiceGroup,
        Some(&consumer_scope(&group)),
    )?;
    groups::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
