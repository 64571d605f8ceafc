use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{EntitySpec, FilterField, FilterKind, ScopeColumns};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    pub id: Uuid,
    pub subscriber_id: String,
    pub last_event_sequence_processed: i64,
    pub is_active: bool,
    pub lease_owner_instance_id: Option<String>,
    pub lease_acquired_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The lease state folded out of the three nullable columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lease {
    Free,
    Held {
        owner: String,
        acquired: DateTime<Utc>,
        expires: DateTime<Utc>,
    },
}

impl EventSubscription {
    pub fn lease(&self) -> Lease {
        match (
            &self.lease_owner_instance_id,
            self.lease_acquired_at,
            self.lease_expires_at,
        ) {
            (Some(owner), Some(acquired), Some(expires)) => Lease::Held {
                owner: owner.clone(),
                acquired,
                expires,
            },
            _ => Lease::Free,
        }
    }

    /// A lease held by `instance_id` and not yet expired.
    pub fn held_by(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        matches!(self.lease(), Lease::Held { ref owner, expires, .. }
            if owner == instance_id && expires > now)
    }
}

const COLUMNS: &str = "id, subscriber_id, last_event_sequence_processed, is_active, \
                       lease_owner_instance_id, lease_acquired_at, lease_expires_at, created_at";

pub static SPEC: EntitySpec = EntitySpec {
    table: "event_subscriptions",
    columns: "id, subscriber_id, last_event_sequence_processed, is_active, \
              lease_owner_instance_id, lease_acquired_at, lease_expires_at, created_at",
    filters: &[FilterField {
        name: "subscriberId",
        column: "subscriber_id",
        kind: FilterKind::Exact,
    }],
    scope: ScopeColumns {
        participant: None,
        provider: None,
        consumer: None,
        agent: None,
    },
    default_sort: "id",
};

pub async fn get_by_subscriber(pool: &PgPool, subscriber_id: &str) -> AppResult<EventSubscription> {
    sqlx::query_as::<_, EventSubscription>(&format!(
        "SELECT {COLUMNS} FROM event_subscriptions WHERE subscriber_id = $1"
    ))
    .bind(subscriber_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

/// Acquires the subscriber's lease for `instance_id`. The compare-and-set
/// runs under a row lock: only a free or expired lease can change hands.
pub async fn acquire_lease(
    pool: &PgPool,
    subscriber_id: &str,
    instance_id: &str,
    ttl: Duration,
) -> AppResult<EventSubscription> {
    let mut tx = pool.begin().await.map_err(AppError::from)?;
    sqlx::query(
        "INSERT INTO event_subscriptions (id, subscriber_id, last_event_sequence_processed, \
         is_active, created_at) VALUES ($1, $2, 0, TRUE, NOW()) \
         ON CONFLICT (subscriber_id) DO NOTHING",
    )
    .bind(Uuid::now_v7())
    .bind(subscriber_id)
    .execute(&mut *tx)
    .await?;
    let current = sqlx::query_as::<_, EventSubscription>(&format!(
        "SELECT {COLUMNS} FROM event_subscriptions WHERE subscriber_id = $1 FOR UPDATE"
    ))
    .bind(subscriber_id)
    .fetch_one(&mut *tx)
    .await?;
    let now = Utc::now();
    if let Lease::Held { owner, expires, .. } = current.lease() {
        if expires > now && owner != instance_id {
            return Err(AppError::Conflict(format!(
                "lease for {subscriber_id} is held by another instance"
            )));
        }
    }
    let updated = sqlx::query_as::<_, EventSubscription>(&format!(
        "UPDATE event_subscriptions SET lease_owner_instance_id = $2, \
         lease_acquired_at = $3, lease_expires_at = $4 \
         WHERE subscriber_id = $1 RETURNING {COLUMNS}"
    ))
    .bind(subscriber_id)
    .bind(instance_id)
    .bind(now)
    .bind(now + ttl)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await.map_err(AppError::from)?;
    Ok(updated)
}

/// Extends a lease the caller already owns.
pub async fn renew_lease(
    pool: &PgPool,
    subscriber_id: &str,
    instance_id: &str,
    ttl: Duration,
) -> AppResult<EventSubscription> {
    let now = Utc::now();
    let updated = sqlx::query_as::<_, EventSubscription>(&format!(
        "UPDATE event_subscriptions SET lease_expires_at = $3 \
         WHERE subscriber_id = $1 AND lease_owner_instance_id = $2 \
           AND lease_expires_at > $4 \
         RETURNING {COLUMNS}"
    ))
    .bind(subscriber_id)
    .bind(instance_id)
    .bind(now + ttl)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    updated.ok_or_else(|| {
        AppError::Conflict(format!("lease for {subscriber_id} is not held by this instance"))
    })
}

/// Clears the lease fields; a no-op when another instance owns the lease.
pub async fn release_lease(pool: &PgPool, subscriber_id: &str, instance_id: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE event_subscriptions SET lease_owner_instance_id = NULL, \
         lease_acquired_at = NULL, lease_expires_at = NULL \
         WHERE subscriber_id = $1 AND lease_owner_instance_id = $2",
    )
    .bind(subscriber_id)
    .bind(instance_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Validates the caller's lease and returns the subscription, for poll/ack.
pub async fn require_lease(
    pool: &PgPool,
    subscriber_id: &str,
    instance_id: &str,
) -> AppResult<EventSubscription> {
    let subscription = get_by_subscriber(pool, subscriber_id).await?;
    if !subscription.held_by(instance_id, Utc::now()) {
        return Err(AppError::Conflict(format!(
            "lease for {subscriber_id} is not held by this instance"
        )));
    }
    Ok(subscription)
}

/// Moves the cursor forward, never back. Idempotent.
pub async fn acknowledge(
    pool: &PgPool,
    subscriber_id: &str,
    instance_id: &str,
    up_to_sequence: i64,
) -> AppResult<EventSubscription> {
    require_lease(pool, subscriber_id, instance_id).await?;
    let updated = sqlx::query_as::<_, EventSubscription>(&format!(
        "UPDATE event_subscriptions \
         SET last_event_sequence_processed = GREATEST(last_event_sequence_processed, $3) \
         WHERE subscriber_id = $1 AND lease_owner_instance_id = $2 \
         RETURNING {COLUMNS}"
    ))
    .bind(subscriber_id)
    .bind(instance_id)
    .bind(up_to_sequence)
    .fetch_optional(pool)
    .await?;
    updated.ok_or_else(|| AppError::Conflict("lease lost during acknowledge".into()))
}

/// Subscriptions whose lease has lapsed; the reaper logs them so another
/// instance can re-acquire quickly.
pub async fn list_expired_leases(pool: &PgPool) -> AppResult<Vec<EventSubscription>> {
    let expired = sqlx::query_as::<_, EventSubscription>(&format!(
        "SELECT {COLUMNS} FROM event_subscriptions \
         WHERE lease_expires_at IS NOT NULL AND lease_expires_at <= NOW()"
    ))
    .fetch_all(pool)
    .await?;
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(owner: Option<&str>, expires_in: Option<i64>) -> EventSubscription {
        let now = Utc::now();
        EventSubscription {
            id: Uuid::now_v7(),
            subscriber_id: "sub1".into(),
            last_event_sequence_processed: 0,
            is_active: true,
            lease_owner_instance_id: owner.map(String::from),
            lease_acquired_at: owner.map(|_| now),
            lease_expires_at: expires_in.map(|s| now + Duration::seconds(s)),
            created_at: now,
        }
    }

    #[test]
    fn lease_folds_out_of_columns() {
        assert_eq!(subscription(None, None).lease(), Lease::Free);
        assert!(matches!(
            subscription(Some("A"), Some(30)).lease(),
            Lease::Held { .. }
        ));
    }

    #[test]
    fn held_by_requires_owner_and_freshness() {
        let now = Utc::now();
        assert!(subscription(Some("A"), Some(30)).held_by("A", now));
        assert!(!subscription(Some("A"), Some(30)).held_by("B", now));
        assert!(!subscription(Some("A"), Some(-1)).held_by("A", now));
        assert!(!subscription(None, None).held_by("A", now));
    }
}
