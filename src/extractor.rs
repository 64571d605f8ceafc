use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::auth::AuthState;
use crate::error::AppError;
use crate::identity::Identity;

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthenticated)?;
        let auth = parts
            .extensions
            .get::<AuthState>()
            .ok_or_else(|| AppError::Internal("auth state missing".into()))?
            .clone();
        auth.authenticate(bearer).await
    }
}
