use serde_json::json;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::policy::{authorize, Action, ObjectType};
use crate::store::agents;
use crate::store::events::{self, NewEvent};
use crate::store::jobs::{self, Job};
use crate::store::services;

/// Hands out up to `limit` pending jobs to the calling agent. At most one
/// job per service group is returned, and none for a group that already has
/// a job processing on this agent; within a group the highest priority wins,
/// oldest first. Returned jobs are flipped to processing in the same
/// transaction, each with its `JobClaimed` event.
pub async fn claim_jobs(pool: &PgPool, identity: &Identity, limit: i64) -> AppResult<Vec<Job>> {
    authorize(identity, Action::Claim, ObjectType::Job, None)?;
    let agent_id = identity.agent_id.ok_or(AppError::Forbidden)?;
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await.map_err(AppError::from)?;
    let candidates = jobs::pending_for_agent(&mut tx, agent_id, limit).await?;
    let mut claimed = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        // The compare-and-set skips jobs another claimer raced us to.
        let Some(job) = jobs::mark_processing(&mut tx, candidate.id).await? else {
            continue;
        };
        let service = services::get_for_update(&mut tx, job.service_id).await?;
        let mut event = NewEvent::from_identity(identity, events::TYPE_JOB_CLAIMED);
        event.entity_id = Some(job.id);
        event.provider_id = Some(service.provider_id);
        event.consumer_id = Some(service.consumer_id);
        event.agent_id = Some(agent_id);
        event.payload = json!({
            "jobId": job.id,
            "serviceId": service.id,
            "action": job.action,
        });
        events::append(&mut tx, &event).await?;
        claimed.push(job);
    }
    // A successful poll doubles as a heartbeat.
    agents::touch_connected(&mut tx, agent_id).await?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(claimed)
}
