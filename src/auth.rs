use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, Role};
use crate::store::tokens;

/// One way of turning a bearer credential into an Identity. Authenticators
/// are tried in configured order; `Ok(None)` means "not mine / no match" so
/// the next one gets a chance. The reason a credential failed never reaches
/// the response.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn authenticate(&self, bearer: &str) -> AppResult<Option<Identity>>;
    async fn healthy(&self) -> bool;
}

/// Opaque-token lookup against the hashed tokens table.
pub struct TokenAuthenticator {
    pool: PgPool,
}

impl TokenAuthenticator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn authenticate(&self, bearer: &str) -> AppResult<Option<Identity>> {
        let hashed = tokens::hash_value(bearer);
        let Some(token) = tokens::find_live_by_hash(&self.pool, &hashed).await? else {
            return Ok(None);
        };
        let identity = Identity {
            id: token.id,
            name: token.name,
            role: Role::parse(&token.role)?,
            participant_id: token.participant_id,
            agent_id: token.agent_id,
        };
        identity.validate()?;
        Ok(Some(identity))
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[derive(Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    kid: Option<String>,
    n: String,
    e: String,
}

#[derive(Deserialize)]
struct OidcClaims {
    sub: Uuid,
    #[serde(default)]
    name: Option<String>,
    role: String,
    #[serde(default)]
    participant_id: Option<Uuid>,
    #[serde(default)]
    agent_id: Option<Uuid>,
}

/// OIDC bearer verification: issuer discovery, JWKS key cache, RS256.
pub struct OidcAuthenticator {
    issuer: String,
    client_id: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl OidcAuthenticator {
    pub fn new(issuer: String, client_id: String) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            client_id,
            http: reqwest::Client::new(),
            keys: RwLock::new(HashMap::new()),
        }
    }

    fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer)
    }

    async fn refresh_keys(&self) -> AppResult<()> {
        let discovery: OidcDiscovery = self
            .http
            .get(self.discovery_url())
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("oidc discovery: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("oidc discovery: {e}")))?;
        let jwks: JwksDocument = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("jwks fetch: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("jwks fetch: {e}")))?;
        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in jwks.keys {
            if let Ok(key) = DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                keys.insert(jwk.kid.unwrap_or_default(), key);
            }
        }
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> AppResult<Option<DecodingKey>> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(Some(key.clone()));
        }
        self.refresh_keys().await?;
        Ok(self.keys.read().await.get(kid).cloned())
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    fn name(&self) -> &'static str {
        "oauth"
    }

    async fn authenticate(&self, bearer: &str) -> AppResult<Option<Identity>> {
        // Opaque tokens are not JWTs; let the next authenticator handle them.
        let Ok(header) = decode_header(bearer) else {
            return Ok(None);
        };
        let kid = header.kid.unwrap_or_default();
        let Some(key) = self.key_for(&kid).await? else {
            tracing::debug!(%kid, "no jwks key for token");
            return Ok(None);
        };
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);
        let decoded = match decode::<OidcClaims>(bearer, &key, &validation) {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!(?err, "oidc token rejected");
                return Ok(None);
            }
        };
        let claims = decoded.claims;
        let identity = Identity {
            id: claims.sub,
            name: claims.name.unwrap_or_else(|| claims.sub.to_string()),
            role: Role::parse(&claims.role)?,
            participant_id: claims.participant_id,
            agent_id: claims.agent_id,
        };
        identity.validate()?;
        Ok(Some(identity))
    }

    async fn healthy(&self) -> bool {
        self.http
            .get(self.discovery_url())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// The configured authenticator chain, shared with every request.
#[derive(Clone)]
pub struct AuthState {
    authenticators: Arc<Vec<Box<dyn Authenticator>>>,
}

impl AuthState {
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        Self {
            authenticators: Arc::new(authenticators),
        }
    }

    pub async fn authenticate(&self, bearer: &str) -> AppResult<Identity> {
        for authenticator in self.authenticators.iter() {
            if let Some(identity) = authenticator.authenticate(bearer).await? {
                return Ok(identity);
            }
        }
        Err(AppError::Unauthenticated)
    }

    pub async fn all_healthy(&self) -> bool {
        for authenticator in self.authenticators.iter() {
            if !authenticator.healthy().await {
                tracing::warn!(authenticator = authenticator.name(), "authenticator unhealthy");
                return false;
            }
        }
        true
    }
}
