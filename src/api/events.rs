use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use chrono::Duration;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, ObjectScope};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::events::{self, Event};
use crate::store::subscriptions::{self, EventSubscription};
use crate::store::{list_page, Page};

use super::page_req;

pub async fn list(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<Event>>> {
    authorize(&identity, Action::Read, ObjectType::Event, None)?;
    let req = page_req(&params)?;
    Ok(Json(list_page(&pool, &events::SPEC, &identity, &req).await?))
}

pub async fn get_one(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Event>> {
    let event = events::get_by_id(&pool, id).await?;
    authorize(
        &identity,
        Action::Read,
        ObjectType::Event,
        Some(&ObjectScope {
            provider_id: event.provider_id,
            consumer_id: event.consumer_id,
            agent_id: event.agent_id,
            ..Default::default()
        }),
    )?;
    Ok(Json(event))
}

pub async fn list_subscriptions(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Page<EventSubscription>>> {
    authorize(&identity, Action::Read, ObjectType::EventSubscription, None)?;
    let req = page_req(&params)?;
    Ok(Json(
        list_page(&pool, &subscriptions::SPEC, &identity, &req).await?,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRequest {
    pub instance_id: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
}

fn default_ttl() -> i64 {
    30
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceQuery {
    pub instance_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub instance_id: String,
    #[serde(default = "default_poll_limit")]
    pub limit: i64,
}

fn default_poll_limit() -> i64 {
    100
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub instance_id: String,
    pub up_to_sequence: i64,
}

pub async fn acquire_lease(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(subscriber_id): Path<String>,
    Json(payload): Json<LeaseRequest>,
) -> AppResult<Json<EventSubscription>> {
    authorize(&identity, Action::Lease, ObjectType::EventSubscription, None)?;
    if payload.ttl_seconds <= 0 {
        return Err(AppError::BadRequest("ttlSeconds must be positive".into()));
    }
    let subscription = subscriptions::acquire_lease(
        &pool,
        &subscriber_id,
        &payload.instance_id,
        Duration::seconds(payload.ttl_seconds),
    )
    .await?;
    Ok(Json(subscription))
}

pub async fn renew_lease(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(subscriber_id): Path<String>,
    Json(payload): Json<LeaseRequest>,
) -> AppResult<Json<EventSubscription>> {
    authorize(&identity, Action::Lease, ObjectType::EventSubscription, None)?;
    let subscription = subscriptions::renew_lease(
        &pool,
        &subscriber_id,
        &payload.instance_id,
        Duration::seconds(payload.ttl_seconds),
    )
    .await?;
    Ok(Json(subscription))
}

pub async fn release_lease(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(subscriber_id): Path<String>,
    Query(query): Query<InstanceQuery>,
) -> AppResult<Json<serde_json::Value>> {
    authorize(&identity, Action::Lease, ObjectType::EventSubscription, None)?;
    subscriptions::release_lease(&pool, &subscriber_id, &query.instance_id).await?;
    Ok(Json(serde_json::json!({"released": true})))
}

/// Returns the batch after the cursor without advancing it; delivery is
/// at-least-once until acknowledged.
pub async fn poll(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(subscriber_id): Path<String>,
    Json(payload): Json<PollRequest>,
) -> AppResult<Json<Vec<Event>>> {
    authorize(&identity, Action::Poll, ObjectType::EventSubscription, None)?;
    let subscription =
        subscriptions::require_lease(&pool, &subscriber_id, &payload.instance_id).await?;
    let batch = events::list_from_sequence(
        &pool,
        subscription.last_event_sequence_processed,
        payload.limit.clamp(1, 1000),
    )
    .await?;
    Ok(Json(batch))
}

pub async fn acknowledge(
    Extension(pool): Extension<PgPool>,
    identity: Identity,
    Path(subscriber_id): Path<String>,
    Json(payload): Json<AckRequest>,
) -> AppResult<Json<EventSubscription>> {
    authorize(&identity, Action::Ack, ObjectType::EventSubscription, None)?;
    let subscription = subscriptions::acknowledge(
        &pool,
        &subscriber_id,
        &payload.instance_id,
        payload.up_to_sequence,
    )
    .await?;
    Ok(Json(subscription))
}
