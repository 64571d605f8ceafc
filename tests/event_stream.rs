mod common;

use chrono::Duration;
use common::{commander, consumer, seed};
use conductor::commander::CreateServiceInput;
use conductor::error::AppError;
use conductor::store::{events, subscriptions};
use serde_json::json;
use sqlx::PgPool;

fn vm_properties() -> serde_json::Value {
    json!({"cpu": 2, "memory": 1024, "disk": 8, "image": "ubuntu"})
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn sequence_numbers_are_dense_and_ordered(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    for i in 0..10 {
        cmd.create_service(
            &caller,
            CreateServiceInput {
                name: format!("s{i}"),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    }

    let log = events::list_from_sequence(&pool, 0, 100).await.unwrap();
    assert_eq!(log.len(), 10);
    for (i, event) in log.iter().enumerate() {
        assert_eq!(
            event.sequence_number,
            i as i64 + 1,
            "dense, gap-free, starting at 1"
        );
        assert_eq!(event.event_type, events::TYPE_SERVICE_CREATED);
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_writers_produce_a_contiguous_range(pool: PgPool) {
    let world = seed(&pool).await;
    let caller = consumer(world.consumer_id);

    let mut handles = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        let caller = caller.clone();
        let world_group = world.group_id;
        let world_type = world.service_type_id;
        let world_agent = world.agent_id;
        handles.push(tokio::spawn(async move {
            let cmd = commander(&pool);
            cmd.create_service(
                &caller,
                CreateServiceInput {
                    name: format!("c{i}"),
                    service_type_id: world_type,
                    group_id: world_group,
                    agent_id: Some(world_agent),
                    tags: vec![],
                    properties: json!({"cpu": 1, "memory": 256, "disk": 1, "image": "alpine"}),
                },
            )
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let log = events::list_from_sequence(&pool, 0, 100).await.unwrap();
    assert_eq!(log.len(), 20);
    let sequences: Vec<i64> = log.iter().map(|e| e.sequence_number).collect();
    let expected: Vec<i64> = (1..=20).collect();
    assert_eq!(sequences, expected, "no gaps, strictly monotonic");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn lease_hand_off_and_at_least_once_replay(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    for i in 0..5 {
        cmd.create_service(
            &caller,
            CreateServiceInput {
                name: format!("s{i}"),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    }

    // Instance A takes the lease, reads, acks part of the batch.
    let sub = subscriptions::acquire_lease(&pool, "sub1", "A", Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(sub.last_event_sequence_processed, 0);
    let batch = events::list_from_sequence(&pool, 0, 100).await.unwrap();
    assert_eq!(batch.len(), 5);
    subscriptions::acknowledge(&pool, "sub1", "A", 3).await.unwrap();

    // While A's lease is live, B cannot take it.
    let err = subscriptions::acquire_lease(&pool, "sub1", "B", Duration::seconds(30))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Expire A's lease; B acquires and resumes after the last ack.
    sqlx::query(
        "UPDATE event_subscriptions SET lease_expires_at = NOW() - INTERVAL '1 second' \
         WHERE subscriber_id = 'sub1'",
    )
    .execute(&pool)
    .await
    .unwrap();
    let sub = subscriptions::acquire_lease(&pool, "sub1", "B", Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(sub.last_event_sequence_processed, 3, "acked events stay acked");

    // A no longer holds the lease: poll-path validation and ack both fail.
    assert!(matches!(
        subscriptions::require_lease(&pool, "sub1", "A").await,
        Err(AppError::Conflict(_))
    ));
    assert!(matches!(
        subscriptions::acknowledge(&pool, "sub1", "A", 5).await,
        Err(AppError::Conflict(_))
    ));

    // B replays only the unacknowledged tail.
    let replay = events::list_from_sequence(&pool, sub.last_event_sequence_processed, 100)
        .await
        .unwrap();
    let sequences: Vec<i64> = replay.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequences, vec![4, 5]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn acknowledge_never_moves_the_cursor_backwards(pool: PgPool) {
    seed(&pool).await;
    subscriptions::acquire_lease(&pool, "sub1", "A", Duration::seconds(30))
        .await
        .unwrap();
    let sub = subscriptions::acknowledge(&pool, "sub1", "A", 10).await.unwrap();
    assert_eq!(sub.last_event_sequence_processed, 10);
    let sub = subscriptions::acknowledge(&pool, "sub1", "A", 4).await.unwrap();
    assert_eq!(sub.last_event_sequence_processed, 10, "idempotent, monotonic");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn renew_extends_only_the_owners_lease(pool: PgPool) {
    seed(&pool).await;
    subscriptions::acquire_lease(&pool, "sub1", "A", Duration::seconds(30))
        .await
        .unwrap();
    assert!(subscriptions::renew_lease(&pool, "sub1", "A", Duration::seconds(60))
        .await
        .is_ok());
    assert!(matches!(
        subscriptions::renew_lease(&pool, "sub1", "B", Duration::seconds(60)).await,
        Err(AppError::Conflict(_))
    ));

    subscriptions::release_lease(&pool, "sub1", "A").await.unwrap();
    let sub = subscriptions::get_by_subscriber(&pool, "sub1").await.unwrap();
    assert_eq!(sub.lease(), subscriptions::Lease::Free);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn expired_leases_are_listed_for_the_reaper(pool: PgPool) {
    seed(&pool).await;
    subscriptions::acquire_lease(&pool, "sub1", "A", Duration::seconds(30))
        .await
        .unwrap();
    assert!(subscriptions::list_expired_leases(&pool).await.unwrap().is_empty());

    sqlx::query(
        "UPDATE event_subscriptions SET lease_expires_at = NOW() - INTERVAL '1 second' \
         WHERE subscriber_id = 'sub1'",
    )
    .execute(&pool)
    .await
    .unwrap();
    let expired = subscriptions::list_expired_leases(&pool).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].subscriber_id, "sub1");
}
