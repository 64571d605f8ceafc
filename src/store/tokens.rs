use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::Role;
use crate::store::{expect_updated, EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub hashed_value: String,
    pub role: String,
    pub participant_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str =
    "id, name, hashed_value, role, participant_id, agent_id, expire_at, created_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "tokens",
    columns: "id, name, hashed_value, role, participant_id, agent_id, expire_at, created_at",
    filters: &[
        FilterField {
            name: "name",
            column: "name",
            kind: FilterKind::Contains,
        },
        FilterField {
            name: "role",
            column: "role",
            kind: FilterKind::Exact,
        },
    ],
    scope: ScopeColumns {
        participant: Some("participant_id"),
        provider: None,
        consumer: None,
        agent: Some("agent_id"),
    },
    default_sort: "id",
};

pub fn hash_value(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Mints a token. The plaintext is returned once and only its hash stored.
pub async fn create(
    pool: &PgPool,
    name: &str,
    role: Role,
    participant_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    expire_at: DateTime<Utc>,
) -> AppResult<(Token, String)> {
    match role {
        Role::Admin if participant_id.is_some() || agent_id.is_some() => {
            return Err(AppError::BadRequest("admin token must not be scoped".into()))
        }
        Role::Participant if participant_id.is_none() => {
            return Err(AppError::BadRequest(
                "participant token requires a participant id".into(),
            ))
        }
        Role::Agent if agent_id.is_none() => {
            return Err(AppError::BadRequest("agent token requires an agent id".into()))
        }
        _ => {}
    }
    let plaintext = format!("cdt_{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let token = sqlx::query_as::<_, Token>(&format!(
        "INSERT INTO tokens (id, name, hashed_value, role, participant_id, agent_id, expire_at, \
         created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(hash_value(&plaintext))
    .bind(role.as_str())
    .bind(participant_id)
    .bind(agent_id)
    .bind(expire_at)
    .fetch_one(pool)
    .await?;
    Ok((token, plaintext))
}

/// Authentication lookup: by hash, unexpired only.
pub async fn find_live_by_hash(pool: &PgPool, hashed: &str) -> AppResult<Option<Token>> {
    let token = sqlx::query_as::<_, Token>(&format!(
        "SELECT {COLUMNS} FROM tokens WHERE hashed_value = $1 AND expire_at > NOW()"
    ))
    .bind(hashed)
    .fetch_optional(pool)
    .await?;
    Ok(token)
}

pub async fn get_by_id(pool: &PgPool, id: Uuid) -> AppResult<Token> {
    sqlx::query_as::<_, Token>(&format!("SELECT {COLUMNS} FROM tokens WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    expect_updated(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_stable_and_one_way() {
        let a = hash_value("cdt_example");
        let b = hash_value("cdt_example");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_value("cdt_other"));
        assert!(!a.contains("example"));
    }
}
