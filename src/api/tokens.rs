use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::identity::{Identity, Role};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::tokens::{self, Token};
use crate::store::{list_page, Page};

use super::page_req;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToken {
    pub name: String,
    pub role: String,
    pub participant_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub expire_at: Option<DateTime<Utc>>,
}

/// The only response that ever carries the plaintext.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedToken {
    #[serde(flatten)]
    pub token: Token,
    pub value: String,
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Token>>> {
    authorize(&identity, Action::Read, ObjectType::Token, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &tokens::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Token>> {
    authorize(&identity, Action::Read, ObjectType::Token, None)?;
    Ok(Json(tokens::get_by_id(&pool, id).await?))
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Json(payload): Json<CreateToken>,
) -> AppResult<(StatusCode, Json<MintedToken>)> {
    authorize(&identity, Action::Create, ObjectType::Token, None)?;
    let role = Role::parse(&payload.role)?;
    let expire_at = payload
        .expire_at
        .unwrap_or_else(|| Utc::now() + Duration::days(365));
    let (token, value) = tokens::create(
        &pool,
        &payload.name,
        role,
        payload.participant_id,
        payload.agent_id,
        expire_at,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(MintedToken { token, value })))
}

pub async fn remove(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::Token, None)?;
    tokens::delete(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
