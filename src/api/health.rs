use axum::{extract::Extension, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::{timeout, Duration};

use crate::auth::AuthState;

#[derive(Serialize)]
pub struct HealthReport {
    pub status: &'static str,
}

async fn healthz() -> Json<HealthReport> {
    Json(HealthReport { status: "UP" })
}

/// Readiness: database ping under a short timeout plus every configured
/// authenticator.
async fn ready(
    Extension(pool): Extension<PgPool>,
    Extension(auth): Extension<AuthState>,
) -> (StatusCode, Json<HealthReport>) {
    let db_up = matches!(
        timeout(Duration::from_secs(2), sqlx::query("SELECT 1").execute(&pool)).await,
        Ok(Ok(_))
    );
    let auth_up = auth.all_healthy().await;
    if db_up && auth_up {
        (StatusCode::OK, Json(HealthReport { status: "UP" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthReport { status: "DOWN" }),
        )
    }
}

pub fn routes() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ready", get(ready))
}
