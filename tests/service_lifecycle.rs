mod common;

use common::{admin, agent, commander, consumer, seed, set_service_status};
use conductor::commander::{CreateServiceInput, JobOutcome, OutcomeReport};
use conductor::dispatcher;
use conductor::error::AppError;
use conductor::store::{events, jobs, services};
use serde_json::json;
use sqlx::PgPool;

fn vm_properties() -> serde_json::Value {
    json!({"cpu": 2, "memory": 1024, "disk": 8, "image": "ubuntu"})
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn create_service_then_agent_claims_the_create_job(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: None,
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    assert_eq!(service.status, "New");
    assert_eq!(service.provider_id, world.provider_id);
    assert_eq!(service.consumer_id, world.consumer_id);

    let claimed = dispatcher::claim_jobs(&pool, &agent(world.agent_id), 1)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].action, "create");
    assert_eq!(claimed[0].service_id, service.id);
    assert_eq!(claimed[0].status, jobs::STATUS_PROCESSING);

    let created_events = events::list_from_sequence(&pool, 0, 100).await.unwrap();
    let kinds: Vec<&str> = created_events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(kinds.contains(&events::TYPE_SERVICE_CREATED));
    assert!(kinds.contains(&events::TYPE_JOB_CLAIMED));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn success_outcome_transitions_and_merges_agent_properties(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);
    let runner = agent(world.agent_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();

    let claimed = dispatcher::claim_jobs(&pool, &runner, 1).await.unwrap();
    let job = cmd
        .report_job_outcome(
            &runner,
            claimed[0].id,
            OutcomeReport {
                outcome: JobOutcome::Success,
                properties: Some(json!({"hostKey": "ssh-ed25519 AAAA"})),
                error_message: None,
                agent_instance_id: Some("vm-81723".into()),
                agent_instance_data: Some(json!({"node": "h4"})),
            },
        )
        .await
        .unwrap();
    assert_eq!(job.status, jobs::STATUS_COMPLETED);
    assert!(job.completed_at.is_some());

    let service = services::get_by_id(&pool, service.id).await.unwrap();
    assert_eq!(service.status, "Stopped");
    assert_eq!(service.properties["hostKey"], json!("ssh-ed25519 AAAA"));
    assert_eq!(service.agent_instance_id.as_deref(), Some("vm-81723"));

    let log = events::list_from_sequence(&pool, 0, 100).await.unwrap();
    let transition = log
        .iter()
        .find(|e| e.event_type == events::TYPE_SERVICE_TRANSITIONED)
        .expect("transition event");
    assert_eq!(
        events::transition_status(&transition.payload),
        Some("Stopped")
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failure_outcome_follows_the_matching_error_regexp(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);
    let runner = agent(world.agent_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    common::finish_open_jobs(&pool, service.id).await;
    set_service_status(&pool, service.id, "Stopped").await;

    cmd.execute_action(&caller, service.id, "start", None)
        .await
        .unwrap();
    let claimed = dispatcher::claim_jobs(&pool, &runner, 1).await.unwrap();
    let job = cmd
        .report_job_outcome(
            &runner,
            claimed[0].id,
            OutcomeReport::failure("quota usage exceeded"),
        )
        .await
        .unwrap();
    assert_eq!(job.status, jobs::STATUS_FAILED);
    assert_eq!(job.error_message.as_deref(), Some("quota usage exceeded"));

    let service = services::get_by_id(&pool, service.id).await.unwrap();
    assert_eq!(service.status, "Failed", "regexp transition wins");
    assert!(service.failed_at.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn failure_outcome_without_regexp_match_uses_bare_error_transition(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);
    let runner = agent(world.agent_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    common::finish_open_jobs(&pool, service.id).await;
    set_service_status(&pool, service.id, "Stopped").await;

    cmd.execute_action(&caller, service.id, "start", None)
        .await
        .unwrap();
    let claimed = dispatcher::claim_jobs(&pool, &runner, 1).await.unwrap();
    cmd.report_job_outcome(&runner, claimed[0].id, OutcomeReport::failure("disk on fire"))
        .await
        .unwrap();

    let service = services::get_by_id(&pool, service.id).await.unwrap();
    assert_eq!(service.status, "Stopped");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn update_policy_blocks_changes_outside_allowed_states(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    set_service_status(&pool, service.id, "Running").await;

    let err = cmd
        .update_service_properties(&caller, service.id, &json!({"cpu": 4}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Immutable(_)));

    set_service_status(&pool, service.id, "Stopped").await;
    let updated = cmd
        .update_service_properties(&caller, service.id, &json!({"cpu": 4}))
        .await
        .unwrap();
    assert_eq!(updated.properties["cpu"], json!(4));

    // The cpu property declares a hot-update action.
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE service_id = $1 AND action = 'hot-update' \
         AND status = 'pending'",
    )
    .bind(service.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(pending, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn execute_action_checks_legality_without_moving_status(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    common::finish_open_jobs(&pool, service.id).await;
    set_service_status(&pool, service.id, "Stopped").await;

    let err = cmd
        .execute_action(&caller, service.id, "stop", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let job = cmd
        .execute_action(&caller, service.id, "start", Some(5))
        .await
        .unwrap();
    assert_eq!(job.priority, 5);
    let service = services::get_by_id(&pool, service.id).await.unwrap();
    assert_eq!(service.status, "Stopped", "status moves only on report");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn foreign_consumer_is_forbidden(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let stranger =
        conductor::store::participants::create(&pool, "other", "enabled").await.unwrap();

    let err = cmd
        .create_service(
            &consumer(stranger.id),
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: None,
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn job_visibility_follows_the_owning_service(pool: PgPool) {
    use axum::extract::{Extension, Path};

    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    let job_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM jobs WHERE service_id = $1")
        .bind(service.id)
        .fetch_one(&pool)
        .await
        .unwrap();

    // Consumer, provider, and the owning agent all see the single job.
    for identity in [
        caller.clone(),
        consumer(world.provider_id),
        agent(world.agent_id),
    ] {
        let fetched =
            conductor::api::jobs::get_one(Extension(pool.clone()), identity, Path(job_id))
                .await
                .expect("owner can read the job");
        assert_eq!(fetched.0.id, job_id);
    }

    // An unrelated tenant cannot.
    let stranger =
        conductor::store::participants::create(&pool, "other", "enabled").await.unwrap();
    let err = conductor::api::jobs::get_one(
        Extension(pool.clone()),
        consumer(stranger.id),
        Path(job_id),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn delete_requires_terminal_state(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();

    let err = cmd.delete_service(&caller, service.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    set_service_status(&pool, service.id, "Deleted").await;
    cmd.delete_service(&caller, service.id).await.unwrap();
    assert!(matches!(
        services::get_by_id(&pool, service.id).await,
        Err(AppError::NotFound)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn timed_out_jobs_fail_and_follow_the_error_path(pool: PgPool) {
    let world = seed(&pool).await;
    let cmd = commander(&pool);
    let caller = consumer(world.consumer_id);

    let service = cmd
        .create_service(
            &caller,
            CreateServiceInput {
                name: "s1".into(),
                service_type_id: world.service_type_id,
                group_id: world.group_id,
                agent_id: Some(world.agent_id),
                tags: vec![],
                properties: vm_properties(),
            },
        )
        .await
        .unwrap();
    // Age the pending create job past any threshold.
    sqlx::query("UPDATE jobs SET created_at = NOW() - INTERVAL '1 hour' WHERE service_id = $1")
        .bind(service.id)
        .execute(&pool)
        .await
        .unwrap();

    let affected = cmd
        .fail_timed_out_jobs(chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let service = services::get_by_id(&pool, service.id).await.unwrap();
    assert_eq!(service.status, "Failed", "create has a bare error transition");
    let job_status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE service_id = $1")
        .bind(service.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(job_status, "failed");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn admin_sees_everything_consumer_only_their_slice(pool: PgPool) {
    use conductor::store::{list_page, PageReq};

    let world = seed(&pool).await;
    let cmd = commander(&pool);
    cmd.create_service(
        &consumer(world.consumer_id),
        CreateServiceInput {
            name: "s1".into(),
            service_type_id: world.service_type_id,
            group_id: world.group_id,
            agent_id: Some(world.agent_id),
            tags: vec![],
            properties: vm_properties(),
        },
    )
    .await
    .unwrap();

    let stranger =
        conductor::store::participants::create(&pool, "other", "enabled").await.unwrap();
    let all: conductor::store::Page<conductor::store::services::Service> = list_page(
        &pool,
        &conductor::store::services::SPEC,
        &admin(),
        &PageReq::default(),
    )
    .await
    .unwrap();
    assert_eq!(all.total_items, 1);

    let foreign: conductor::store::Page<conductor::store::services::Service> = list_page(
        &pool,
        &conductor::store::services::SPEC,
        &consumer(stranger.id),
        &PageReq::default(),
    )
    .await
    .unwrap();
    assert_eq!(foreign.total_items, 0, "scope filter hides other tenants");
}
