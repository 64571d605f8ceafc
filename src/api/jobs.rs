use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::commander::{Commander, JobOutcome, OutcomeReport};
use crate::dispatcher;
use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::policy::{authorize, Action, ObjectType};
use crate::store::jobs::{self, Job};
use crate::store::{list_page, services, Page};

use super::page_req;

#[derive(Deserialize)]
pub struct ClaimQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    1
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub outcome: String,
    pub properties: Option<Value>,
    pub error_message: Option<String>,
    pub agent_instance_id: Option<String>,
    pub agent_instance_data: Option<Value>,
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Job>>> {
    authorize(&identity, Action::Read, ObjectType::Job, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &jobs::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Job>> {
    let job = jobs::get_by_id(&pool, id).await?;
    // A job's ownership is its service's: provider and consumer see it too,
    // matching the list query's scope.
    let service = services::get_by_id(&pool, job.service_id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Job,
        Some(&service.scope()),
    )?;
    Ok(Json(job))
}

/// Agent poll: hands out a batch respecting per-group serialization.
pub async fn claim(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(query): Query<ClaimQuery>,
) -> AppResult<Json<Vec<Job>>> {
    let claimed = dispatcher::claim_jobs(&pool, &identity, query.limit).await?;
    Ok(Json(claimed))
}

pub async fn report_outcome(
    Extension(commander): Extension<Commander>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportOutcome>,
) -> AppResult<Json<Job>> {
    let outcome = match payload.outcome.as_str() {
        "success" => JobOutcome::Success,
        "failure" => JobOutcome::Failure,
        other => {
            return Err(AppError::BadRequest(format!("unknown outcome: {other}")));
        }
    };
    let job = commander
        .report_job_outcome(
            &identity,
            id,
            OutcomeReport {
                outcome,
                properties: payload.properties,
                error_message: payload.error_message,
                agent_instance_id: payload.agent_instance_id,
                agent_instance_data: payload.agent_instance_data,
            },
        )
        .await?;
    Ok(Json(job))
}
