use chrono::Utc;
use conductor::commander::Commander;
use conductor::identity::{Identity, Role};
use conductor::vault::{Vault, VaultCipher};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

pub const TEST_VAULT_KEY: &str = "6f1d9a6e6f1d9a6e6f1d9a6e6f1d9a6e6f1d9a6e6f1d9a6e6f1d9a6e6f1d9a6e";

pub struct World {
    pub provider_id: Uuid,
    pub consumer_id: Uuid,
    pub agent_type_id: Uuid,
    pub service_type_id: Uuid,
    pub agent_id: Uuid,
    pub group_id: Uuid,
}

pub fn admin() -> Identity {
    Identity {
        id: Uuid::now_v7(),
        name: "root".into(),
        role: Role::Admin,
        participant_id: None,
        agent_id: None,
    }
}

pub fn consumer(participant_id: Uuid) -> Identity {
    Identity {
        id: Uuid::now_v7(),
        name: "consumer".into(),
        role: Role::Participant,
        participant_id: Some(participant_id),
        agent_id: None,
    }
}

pub fn agent(agent_id: Uuid) -> Identity {
    Identity {
        id: Uuid::now_v7(),
        name: "agent".into(),
        role: Role::Agent,
        participant_id: None,
        agent_id: Some(agent_id),
    }
}

pub fn commander(pool: &PgPool) -> Commander {
    let cipher = VaultCipher::from_hex_key(TEST_VAULT_KEY).unwrap();
    Commander::new(pool.clone(), Vault::new(pool.clone(), cipher))
}

pub fn vm_property_schema() -> serde_json::Value {
    json!({
        "properties": {
            "cpu": {"type": "integer", "required": true,
                    "validators": {"min": 1, "max": 64},
                    "update": {"policy": "in-states", "states": ["Stopped"]},
                    "onUpdateAction": "hot-update"},
            "memory": {"type": "integer", "required": true, "validators": {"min": 128}},
            "disk": {"type": "integer", "required": true},
            "image": {"type": "string", "required": true, "update": {"policy": "never"}},
            "hostKey": {"type": "string", "source": "agent"}
        }
    })
}

pub fn vm_lifecycle_schema() -> serde_json::Value {
    json!({
        "initialState": "New",
        "states": ["New", "Creating", "Stopped", "Starting", "Running", "Stopping",
                   "Failed", "Deleted"],
        "terminalStates": ["Deleted", "Failed"],
        "runningStates": ["Running"],
        "transitions": [
            {"from": "New", "to": "Stopped", "action": "create"},
            {"from": "Stopped", "to": "Running", "action": "start"},
            {"from": "Running", "to": "Stopped", "action": "stop"},
            {"from": "Running", "to": "Running", "action": "hot-update"},
            {"from": "Stopped", "to": "Deleted", "action": "delete"},
            {"from": "Stopped", "to": "Failed", "action": "start",
             "onError": true, "onErrorRegexp": "quota.*exceeded"},
            {"from": "Stopped", "to": "Stopped", "action": "start", "onError": true},
            {"from": "New", "to": "Failed", "action": "create", "onError": true}
        ]
    })
}

/// One provider with one connected agent supporting the vm type, one
/// consumer with one empty group.
pub async fn seed(pool: &PgPool) -> World {
    sqlx::migrate!("./migrations").run(pool).await.unwrap();
    let provider = conductor::store::participants::create(pool, "provider-1", "enabled")
        .await
        .unwrap();
    let consumer = conductor::store::participants::create(pool, "consumer-1", "enabled")
        .await
        .unwrap();
    let service_type = conductor::store::service_types::create(
        pool,
        "vm",
        &vm_property_schema(),
        &vm_lifecycle_schema(),
    )
    .await
    .unwrap();
    let agent_type = conductor::store::agent_types::create(pool, "vm-runner", &[service_type.id])
        .await
        .unwrap();
    let agent = conductor::store::agents::create(
        pool,
        &conductor::store::agents::NewAgent {
            name: "agent-1".into(),
            provider_id: provider.id,
            agent_type_id: agent_type.id,
            tags: vec!["ssd".into()],
            configuration: None,
            service_pool_set_id: None,
        },
    )
    .await
    .unwrap();
    connect_agent(pool, agent.id).await;
    let group = conductor::store::groups::create(pool, "group-1", consumer.id)
        .await
        .unwrap();
    World {
        provider_id: provider.id,
        consumer_id: consumer.id,
        agent_type_id: agent_type.id,
        service_type_id: service_type.id,
        agent_id: agent.id,
        group_id: group.id,
    }
}

pub async fn connect_agent(pool: &PgPool, agent_id: Uuid) {
    sqlx::query("UPDATE agents SET status = 'connected', last_status_update = $2 WHERE id = $1")
        .bind(agent_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn set_service_status(pool: &PgPool, service_id: Uuid, status: &str) {
    sqlx::query("UPDATE services SET status = $2 WHERE id = $1")
        .bind(service_id)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn finish_open_jobs(pool: &PgPool, service_id: Uuid) {
    sqlx::query(
        "UPDATE jobs SET status = 'completed', completed_at = NOW() \
         WHERE service_id = $1 AND status IN ('pending', 'processing')",
    )
    .bind(service_id)
    .execute(pool)
    .await
    .unwrap();
}
