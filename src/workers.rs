use chrono::Duration;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::time::{sleep, Duration as TokioDuration};

use crate::commander::Commander;
use crate::config;
use crate::error::AppResult;
use crate::store::agents;
use crate::store::events::{self, NewEvent};
use crate::store::jobs;
use crate::store::subscriptions;

/// Stable advisory-lock key for a named task.
fn lock_key(task: &str) -> i64 {
    let digest = Sha256::digest(format!("{}/{task}", *config::SCHEDULER_LOCK_NAME));
    i64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}

/// Runs `task` on a fixed cadence. Each tick takes a session-level advisory
/// lock keyed by the task name so exactly one instance across the fleet
/// executes it; losers skip the tick. A slow run cannot overlap itself
/// because the next tick waits for the previous one.
fn spawn_periodic<F, Fut>(lock_pool: PgPool, task: &'static str, every: TokioDuration, run: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = AppResult<()>> + Send,
{
    let key = lock_key(task);
    tokio::spawn(async move {
        loop {
            sleep(every).await;
            let mut lock_conn = match lock_pool.acquire().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(?err, task, "scheduler lock connection unavailable");
                    continue;
                }
            };
            let acquired: bool = match sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(key)
                .fetch_one(&mut *lock_conn)
                .await
            {
                Ok(acquired) => acquired,
                Err(err) => {
                    tracing::warn!(?err, task, "advisory lock query failed");
                    continue;
                }
            };
            if !acquired {
                tracing::debug!(task, "another instance holds the task lock");
                continue;
            }
            if let Err(err) = run().await {
                tracing::error!(?err, task, "background task failed");
            }
            if let Err(err) = sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(key)
                .execute(&mut *lock_conn)
                .await
            {
                tracing::warn!(?err, task, "advisory unlock failed");
            }
        }
    });
}

async fn agent_health_sweep(pool: &PgPool) -> AppResult<()> {
    let threshold = Duration::seconds(*config::AGENT_HEALTH_TIMEOUT_SECONDS as i64);
    let mut tx = pool.begin().await?;
    let affected = agents::mark_inactive_as_disconnected(&mut tx, threshold).await?;
    for agent in &affected {
        let mut event = NewEvent::system(events::TYPE_AGENT_DISCONNECTED);
        event.entity_id = Some(agent.id);
        event.agent_id = Some(agent.id);
        event.provider_id = Some(agent.provider_id);
        event.payload = json!({
            "diff": [{"op": "replace", "path": "/status", "value": agents::STATUS_DISCONNECTED}],
        });
        events::append(&mut tx, &event).await?;
    }
    tx.commit().await?;
    if !affected.is_empty() {
        tracing::info!(count = affected.len(), "marked silent agents disconnected");
    }
    Ok(())
}

async fn job_maintenance(pool: &PgPool, commander: &Commander) -> AppResult<()> {
    let timeout = Duration::seconds(*config::JOB_TIMEOUT_SECONDS as i64);
    let failed = commander.fail_timed_out_jobs(timeout).await?;
    if failed > 0 {
        tracing::info!(count = failed, "failed timed-out jobs");
    }
    let retention = Duration::seconds(*config::JOB_RETENTION_SECONDS as i64);
    let reaped = jobs::delete_finished_before(pool, retention).await?;
    if reaped > 0 {
        tracing::info!(count = reaped, "deleted finished jobs past retention");
    }
    Ok(())
}

async fn lease_reaper(pool: &PgPool) -> AppResult<()> {
    let expired = subscriptions::list_expired_leases(pool).await?;
    for subscription in expired {
        tracing::info!(
            subscriber = %subscription.subscriber_id,
            owner = ?subscription.lease_owner_instance_id,
            "subscription lease expired"
        );
    }
    Ok(())
}

/// Starts the three periodic tasks. Failures are logged and the loops keep
/// going; workers never take the process down.
pub fn spawn_all(pool: PgPool, lock_pool: PgPool, commander: Commander) {
    let health_every = TokioDuration::from_secs(*config::AGENT_HEALTH_TIMEOUT_SECONDS);
    let maintenance_every = TokioDuration::from_secs(*config::JOB_MAINTENANCE_INTERVAL_SECONDS);

    let health_pool = pool.clone();
    spawn_periodic(lock_pool.clone(), "agent-health", health_every, move || {
        let pool = health_pool.clone();
        async move { agent_health_sweep(&pool).await }
    });

    let maintenance_pool = pool.clone();
    spawn_periodic(
        lock_pool.clone(),
        "job-maintenance",
        maintenance_every,
        move || {
            let pool = maintenance_pool.clone();
            let commander = commander.clone();
            async move { job_maintenance(&pool, &commander).await }
        },
    );

    spawn_periodic(lock_pool, "lease-reaper", maintenance_every, move || {
        let pool = pool.clone();
        async move { lease_reaper(&pool).await }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_distinct() {
        assert_eq!(lock_key("agent-health"), lock_key("agent-health"));
        assert_ne!(lock_key("agent-health"), lock_key("job-maintenance"));
    }
}
