use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::identity::{Identity, ObjectScope};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::participants::{self, Participant};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
pub struct CreateParticipant {
    pub name: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    participants::STATUS_ENABLED.into()
}

#[derive(Deserialize)]
pub struct UpdateParticipant {
    pub name: Option<String>,
    pub status: Option<String>,
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Participant>>> {
    authorize(&identity, Action::Read, ObjectType::Participant, None)?;
    let req = page_req(&params)?;
    let page = list_page(&pool, &participants::SPEC, &identity, &req).await?;
    Ok(Json(page))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Participant>> {
    let participant = participants::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Participant,
        Some(&ObjectScope::participant(participant.id)),
    )?;
    Ok(Json(participant))
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateParticipant>,
) -> AppResult<(StatusCode, Json<Participant>)> {
    authorize(&identity, Action::Create, ObjectType::Participant, None)?;
    let participant = participants::create(&pool, &payload.name, &payload.status).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

pub async fn update(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateParticipant>,
) -> AppResult<Json<Participant>> {
    authorize(&identity, Action::Update, ObjectType::Participant, None)?;
    let participant = participants::update(
        &pool,
        id,
        payload.name.as_deref(),
        payload.status.as_deref(),
    )
    .await?;
    Ok(Json(participant))
}

pub async fn remove(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::Participant, None)?;
    participants::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
