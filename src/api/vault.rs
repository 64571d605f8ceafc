use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppResult;
use crate::identity::Identity;
use crate::policy::{authorize, Action, ObjectType};
use crate::vault::Vault;

#[derive(Deserialize)]
pub struct SaveSecret {
    pub value: Value,
}

#[derive(Serialize)]
pub struct SecretReference {
    pub reference: String,
}

#[derive(Serialize)]
pub struct SecretValue {
    pub value: Value,
}

pub async fn create(
    Extension(vault): Extension<Vault>,
    identity: Identity,
    Json(payload): Json<SaveSecret>,
) -> AppResult<(StatusCode, Json<SecretReference>)> {
    authorize(&identity, Action::Create, ObjectType::VaultSecret, None)?;
    let reference = vault.save(&payload.value).await?;
    Ok((StatusCode::CREATED, Json(SecretReference { reference })))
}

pub async fn get_one(
    Extension(vault): Extension<Vault>,
    identity: Identity,
    Path(reference): Path<String>,
) -> AppResult<Json<SecretValue>> {
    authorize(&identity, Action::Read, ObjectType::VaultSecret, None)?;
    let value = vault.get(&reference).await?;
    Ok(Json(SecretValue { value }))
}

pub async fn remove(
    Extension(vault): Extension<Vault>,
    identity: Identity,
    Path(reference): Path<String>,
) -> AppResult<StatusCode> {
    authorize(&identity, Action::Delete, ObjectType::VaultSecret, None)?;
    vault.delete(&reference).await?;
    Ok(StatusCode::NO_CONTENT)
}
