mod common;

use chrono::Duration;
use common::seed;
use conductor::store::agents;
use sqlx::PgPool;

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn threshold_zero_disconnects_every_connected_agent(pool: PgPool) {
    let world = seed(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    let affected = agents::mark_inactive_as_disconnected(&mut conn, Duration::zero())
        .await
        .unwrap();
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].id, world.agent_id);

    let status: String = sqlx::query_scalar("SELECT status FROM agents WHERE id = $1")
        .bind(world.agent_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "disconnected");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn generous_threshold_disconnects_none(pool: PgPool) {
    seed(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    let affected = agents::mark_inactive_as_disconnected(&mut conn, Duration::days(3650))
        .await
        .unwrap();
    assert!(affected.is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn agents_without_any_heartbeat_count_as_silent(pool: PgPool) {
    let world = seed(&pool).await;
    sqlx::query("UPDATE agents SET last_status_update = NULL WHERE id = $1")
        .bind(world.agent_id)
        .execute(&pool)
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let affected = agents::mark_inactive_as_disconnected(&mut conn, Duration::days(3650))
        .await
        .unwrap();
    assert_eq!(affected.len(), 1, "null heartbeat is treated as stale");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn matching_needs_every_required_tag(pool: PgPool) {
    let world = seed(&pool).await;
    let found = agents::find_by_service_type_and_tags(
        &pool,
        world.service_type_id,
        &["ssd".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(found.len(), 1);

    let none = agents::find_by_service_type_and_tags(
        &pool,
        world.service_type_id,
        &["ssd".to_string(), "gpu".to_string()],
    )
    .await
    .unwrap();
    assert!(none.is_empty(), "gpu tag is not on the agent");
}
