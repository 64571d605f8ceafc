mod common;

use common::{commander, connect_agent, consumer, seed};
use conductor::commander::CreateServiceInput;
use conductor::error::AppError;
use conductor::store::{agents, pools, service_types};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn pooled_property_schema() -> serde_json::Value {
    json!({
        "properties": {
            "cpu": {"type": "integer", "required": true},
            "ip": {"type": "string", "source": "pool", "required": true, "poolType": "ipv4"}
        }
    })
}

/// A service type whose schema requires a pooled ip, an agent wired to a
/// pool set with `capacity` free addresses.
async fn seed_pooled(pool: &PgPool, world: &common::World, capacity: usize) -> (Uuid, Uuid, Uuid) {
    let service_type = service_types::create(
        pool,
        "pooled-vm",
        &pooled_property_schema(),
        &common::vm_lifecycle_schema(),
    )
    .await
    .unwrap();
    sqlx::query("INSERT INTO agent_type_service_types (agent_type_id, service_type_id) VALUES ($1, $2)")
        .bind(world.agent_type_id)
        .bind(service_type.id)
        .execute(pool)
        .await
        .unwrap();
    let set = pools::create_set(pool, "addresses", world.provider_id).await.unwrap();
    let ip_pool = pools::create_pool(
        pool,
        &pools::NewPool {
            set_id: set.id,
            name: "ipv4".into(),
            pool_type: "ipv4".into(),
            property_type: "string".into(),
            generator_type: "list".into(),
        },
    )
    .await
    .unwrap();
    for i in 0..capacity {
        pools::create_value(
            pool,
            ip_pool.id,
            &format!("10.0.0.{}", i + 1),
            &json!(format!("10.0.0.{}", i + 1)),
        )
        .await
        .unwrap();
    }
    let agent = agents::create(
        pool,
        &agents::NewAgent {
            name: "pooled-agent".into(),
            provider_id: world.provider_id,
            agent_type_id: world.agent_type_id,
            tags: vec![],
            configuration: None,
            service_pool_set_id: Some(set.id),
        },
    )
    .await
    .unwrap();
    connect_agent(pool, agent.id).await;
    (service_type.id, agent.id, ip_pool.id)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn allocation_takes_the_first_free_value_by_name(pool: PgPool) {
    let world = seed(&pool).await;
    let (type_id, agent_id, ip_pool) = seed_pooled(&pool, &world, 3).await;
    let cmd = commander(&pool);

    let service = cmd
        .create_service(
            &consumer(world.consumer_id),
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: type_id,
                group_id: world.group_id,
                agent_id: Some(agent_id),
                tags: vec![],
                properties: json!({"cpu": 1}),
            },
        )
        .await
        .unwrap();
    assert_eq!(service.properties["ip"], json!("10.0.0.1"));

    let free: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM service_pool_values WHERE pool_id = $1 AND service_id IS NULL",
    )
    .bind(ip_pool)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(free, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn exhaustion_fails_the_second_creation(pool: PgPool) {
    let world = seed(&pool).await;
    let (type_id, agent_id, _) = seed_pooled(&pool, &world, 1).await;
    let caller = consumer(world.consumer_id);

    let make = |name: &str| CreateServiceInput {
        name: name.into(),
        service_type_id: type_id,
        group_id: world.group_id,
        agent_id: Some(agent_id),
        tags: vec![],
        properties: json!({"cpu": 1}),
    };

    let first = commander(&pool).create_service(&caller, make("s1")).await;
    let second = commander(&pool).create_service(&caller, make("s2")).await;
    let (ok, err): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(|r| r.is_ok());
    assert_eq!(ok.len(), 1, "exactly one creation wins the last value");
    assert!(matches!(
        err.into_iter().next().unwrap().unwrap_err(),
        AppError::PoolExhausted(_)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn deleting_a_service_frees_its_values(pool: PgPool) {
    let world = seed(&pool).await;
    let (type_id, agent_id, ip_pool) = seed_pooled(&pool, &world, 1).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: type_id,
                group_id: world.group_id,
                agent_id: Some(agent_id),
                tags: vec![],
                properties: json!({"cpu": 1}),
            },
        )
        .await
        .unwrap();
    common::set_service_status(&pool, service.id, "Deleted").await;
    cmd.delete_service(&caller, service.id).await.unwrap();

    let free: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM service_pool_values WHERE pool_id = $1 AND service_id IS NULL",
    )
    .bind(ip_pool)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(free, 1, "released back to the pool");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn agent_without_a_pool_set_cannot_host_pooled_services(pool: PgPool) {
    let world = seed(&pool).await;
    let (type_id, _, _) = seed_pooled(&pool, &world, 1).await;

    // world.agent_id has no pool set attached.
    let err = commander(&pool)
        .create_service(
            &consumer(world.consumer_id),
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: json!({"cpu": 1}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PoolExhausted(_)));
}
