use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::diff::diff;
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, ObjectScope};
use crate::policy::{authorize, Action, ObjectType};
use crate::store::agents::{self, Agent, AgentPatch};
use crate::store::events::{self, NewEvent};
use crate::store::groups;
use crate::store::jobs::{self, Job, NewJob};
use crate::store::pools;
use crate::store::service_types;
use crate::store::services::{self, NewService, Service, TransitionUpdate};
use crate::vault::{self, Vault};

/// Transactional mutation of services, jobs, and agents. Every operation is
/// one transaction; entity writes land before their event rows, and the
/// event sequence is allocated inside the transaction so commit order equals
/// event order.
#[derive(Clone)]
pub struct Commander {
    pool: PgPool,
    vault: Vault,
}

pub struct CreateServiceInput {
    pub name: String,
    pub service_type_id: Uuid,
    pub group_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub properties: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// What an agent reports back for a claimed job.
pub struct OutcomeReport {
    pub outcome: JobOutcome,
    /// Agent-source properties observed during the action.
    pub properties: Option<Value>,
    pub error_message: Option<String>,
    /// The agent's own handle for the service instance.
    pub agent_instance_id: Option<String>,
    pub agent_instance_data: Option<Value>,
}

impl OutcomeReport {
    pub fn success() -> Self {
        Self {
            outcome: JobOutcome::Success,
            properties: None,
            error_message: None,
            agent_instance_id: None,
            agent_instance_data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            outcome: JobOutcome::Failure,
            properties: None,
            error_message: Some(message.into()),
            agent_instance_id: None,
            agent_instance_data: None,
        }
    }
}

fn service_state(service: &Service) -> Value {
    json!({
        "name": service.name,
        "status": service.status,
        "properties": service.properties,
    })
}

/// Diff for a transition event; the `/status` op is always present.
fn transition_diff(before: &Value, after: &Value, status: &str) -> Value {
    let mut ops = diff(before, after);
    let has_status = ops
        .iter()
        .any(|op| op.get("path").and_then(Value::as_str) == Some("/status"));
    if !has_status {
        ops.push(json!({"op": "replace", "path": "/status", "value": status}));
    }
    json!({ "diff": ops })
}

fn service_event(identity: &Identity, event_type: &'static str, service: &Service) -> NewEvent {
    let mut event = NewEvent::from_identity(identity, event_type);
    event.entity_id = Some(service.id);
    event.provider_id = Some(service.provider_id);
    event.consumer_id = Some(service.consumer_id);
    event.agent_id = Some(service.agent_id);
    event
}

impl Commander {
    pub fn new(pool: PgPool, vault: Vault) -> Self {
        Self { pool, vault }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Validates input properties, resolves the target agent, allocates pool
    /// values, stores secrets, inserts the service in its initial state, and
    /// enqueues the `create` job.
    pub async fn create_service(
        &self,
        identity: &Identity,
        input: CreateServiceInput,
    ) -> AppResult<Service> {
        let group = groups::get_by_id(&self.pool, input.group_id).await?;
        authorize(
            identity,
            Action::Create,
            ObjectType::Service,
            Some(&ObjectScope {
                consumer_id: Some(group.consumer_id),
                ..Default::default()
            }),
        )?;
        let service_type = service_types::get_by_id(&self.pool, input.service_type_id).await?;
        let schema = service_type.properties()?;
        let lifecycle = service_type.lifecycle()?;
        schema.validate_create(&input.properties)?;

        let agent = self
            .resolve_agent(input.agent_id, input.service_type_id, &input.tags)
            .await?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let mut properties = input.properties.clone();

        // Secret inputs move to the vault; the tree keeps opaque references.
        if let Value::Object(map) = &mut properties {
            for name in schema.secret_properties() {
                if let Some(value) = map.get(&name) {
                    if !value.as_str().map(vault::is_reference).unwrap_or(false) {
                        let reference = self.vault.save_with(&mut tx, value).await?;
                        map.insert(name, Value::String(reference));
                    }
                }
            }
        }

        let mut service = services::insert(
            &mut tx,
            &NewService {
                name: input.name.clone(),
                service_type_id: input.service_type_id,
                group_id: group.id,
                agent_id: agent.id,
                provider_id: agent.provider_id,
                consumer_id: group.consumer_id,
                status: lifecycle.initial_state.clone(),
                properties: properties.clone(),
            },
        )
        .await?;

        let pool_properties = schema.pool_properties();
        if !pool_properties.is_empty() {
            let set_id = agent.service_pool_set_id.ok_or_else(|| {
                AppError::PoolExhausted(format!("agent {} has no pool set", agent.id))
            })?;
            let Value::Object(map) = &mut properties else {
                return Err(AppError::BadRequest("properties must be an object".into()));
            };
            for (name, pool_type) in pool_properties {
                let pool = pools::find_pool_by_type(&mut tx, set_id, &pool_type).await?;
                let allocated = pools::allocate_value(&mut tx, pool.id, service.id).await?;
                map.insert(name, allocated.value);
            }
            services::update_properties(&mut tx, service.id, &properties).await?;
            service.properties = properties.clone();
        }

        let job = jobs::insert(
            &mut tx,
            &NewJob {
                service_id: service.id,
                agent_id: agent.id,
                action: "create".into(),
                priority: 0,
                payload: Some(json!({ "properties": service.properties })),
            },
        )
        .await?;

        let mut event = service_event(identity, events::TYPE_SERVICE_CREATED, &service);
        event.payload = json!({
            "diff": diff(&json!({}), &service_state(&service)),
            "jobId": job.id,
        });
        events::append(&mut tx, &event).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(service)
    }

    async fn resolve_agent(
        &self,
        explicit: Option<Uuid>,
        service_type_id: Uuid,
        tags: &[String],
    ) -> AppResult<Agent> {
        if let Some(agent_id) = explicit {
            let agent = agents::get_by_id(&self.pool, agent_id).await?;
            let supported = crate::store::agent_types::supports_service_type(
                &self.pool,
                agent.agent_type_id,
                service_type_id,
            )
            .await?;
            if !supported {
                return Err(AppError::BadRequest(
                    "agent does not support the service type".into(),
                ));
            }
            return Ok(agent);
        }
        let candidates =
            agents::find_by_service_type_and_tags(&self.pool, service_type_id, tags).await?;
        // Candidates come back ordered by id; the first connected one wins,
        // which keeps placement deterministic across instances.
        candidates
            .into_iter()
            .find(|a| a.status == agents::STATUS_CONNECTED)
            .ok_or(AppError::NoAgentAvailable)
    }

    /// Merges a property patch, enforcing per-property update policy against
    /// the current status, and enqueues agent work when a changed property
    /// declares it.
    pub async fn update_service_properties(
        &self,
        identity: &Identity,
        service_id: Uuid,
        patch: &Value,
    ) -> AppResult<Service> {
        let existing = services::get_by_id(&self.pool, service_id).await?;
        authorize(
            identity,
            Action::Update,
            ObjectType::Service,
            Some(&existing.scope()),
        )?;
        let service_type = service_types::get_by_id(&self.pool, existing.service_type_id).await?;
        let schema = service_type.properties()?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let service = services::get_for_update(&mut tx, service_id).await?;
        let outcome = schema.merge_update(&service.properties, patch, &service.status)?;
        if outcome.changed.is_empty() {
            tx.commit().await.map_err(AppError::from)?;
            return Ok(service);
        }

        let mut merged = outcome.merged;
        let secret_names = schema.secret_properties();
        if let Value::Object(map) = &mut merged {
            for name in &secret_names {
                if !outcome.changed.contains(name) {
                    continue;
                }
                if let Some(value) = map.get(name) {
                    if !value.as_str().map(vault::is_reference).unwrap_or(false) {
                        let reference = self.vault.save_with(&mut tx, value).await?;
                        map.insert(name.clone(), Value::String(reference));
                    }
                }
            }
        }

        services::update_properties(&mut tx, service.id, &merged).await?;
        for action in &outcome.actions {
            jobs::insert(
                &mut tx,
                &NewJob {
                    service_id: service.id,
                    agent_id: service.agent_id,
                    action: action.clone(),
                    priority: 0,
                    payload: Some(json!({
                        "properties": merged,
                        "changed": outcome.changed,
                    })),
                },
            )
            .await?;
        }

        let mut event = service_event(identity, events::TYPE_SERVICE_PROPERTIES_UPDATED, &service);
        event.payload = json!({
            "diff": diff(
                &json!({"properties": service.properties}),
                &json!({"properties": merged}),
            ),
        });
        events::append(&mut tx, &event).await?;
        tx.commit().await.map_err(AppError::from)?;
        services::get_by_id(&self.pool, service_id).await
    }

    /// Queues a lifecycle action for the owning agent. The service status
    /// does not move until the agent reports the outcome; the pending job is
    /// the only marker.
    pub async fn execute_action(
        &self,
        identity: &Identity,
        service_id: Uuid,
        action: &str,
        priority: Option<i32>,
    ) -> AppResult<Job> {
        let existing = services::get_by_id(&self.pool, service_id).await?;
        authorize(
            identity,
            Action::Execute,
            ObjectType::Service,
            Some(&existing.scope()),
        )?;
        let service_type = service_types::get_by_id(&self.pool, existing.service_type_id).await?;
        let lifecycle = service_type.lifecycle()?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let service = services::get_for_update(&mut tx, service_id).await?;
        lifecycle.resolve(&service.status, action)?;
        let job = jobs::insert(
            &mut tx,
            &NewJob {
                service_id: service.id,
                agent_id: service.agent_id,
                action: action.to_string(),
                priority: priority.unwrap_or(0),
                payload: Some(json!({ "properties": service.properties })),
            },
        )
        .await?;
        let mut event = service_event(identity, events::TYPE_SERVICE_ACTION_REQUESTED, &service);
        event.payload = json!({ "action": action, "jobId": job.id });
        events::append(&mut tx, &event).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(job)
    }

    /// Applies an agent-reported job outcome: the success transition with
    /// any agent-supplied properties, or the declared error path.
    pub async fn report_job_outcome(
        &self,
        identity: &Identity,
        job_id: Uuid,
        report: OutcomeReport,
    ) -> AppResult<Job> {
        let existing = jobs::get_by_id(&self.pool, job_id).await?;
        authorize(
            identity,
            Action::Report,
            ObjectType::Job,
            Some(&ObjectScope {
                agent_id: Some(existing.agent_id),
                ..Default::default()
            }),
        )?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let job = jobs::get_for_update(&mut tx, job_id).await?;
        if job.status != jobs::STATUS_PROCESSING {
            return Err(AppError::Conflict(format!(
                "job {} is not processing",
                job.id
            )));
        }
        let service = services::get_for_update(&mut tx, job.service_id).await?;
        let service_type = service_types::get_by_id(&self.pool, service.service_type_id).await?;
        let schema = service_type.properties()?;
        let lifecycle = service_type.lifecycle()?;
        let before = service_state(&service);

        match report.outcome {
            JobOutcome::Success => {
                let to = lifecycle.resolve(&service.status, &job.action)?.to_string();
                let properties = match &report.properties {
                    Some(reported) => {
                        Some(schema.merge_agent_properties(&service.properties, reported)?)
                    }
                    None => None,
                };
                services::apply_transition(
                    &mut tx,
                    service.id,
                    &TransitionUpdate {
                        status: to.clone(),
                        properties: properties.clone(),
                        agent_instance_id: report.agent_instance_id.clone(),
                        agent_instance_data: report.agent_instance_data.clone(),
                        failed_at: None,
                    },
                )
                .await?;
                jobs::mark_completed(&mut tx, job.id).await?;
                let after = json!({
                    "name": service.name,
                    "status": to,
                    "properties": properties.unwrap_or_else(|| service.properties.clone()),
                });
                let mut event =
                    service_event(identity, events::TYPE_SERVICE_TRANSITIONED, &service);
                event.payload = transition_diff(&before, &after, &to);
                events::append(&mut tx, &event).await?;
            }
            JobOutcome::Failure => {
                let message = report.error_message.as_deref().unwrap_or("agent reported failure");
                jobs::mark_failed(&mut tx, job.id, message).await?;
                if let Some(to) =
                    lifecycle.resolve_error_transition(&service.status, &job.action, message)
                {
                    let to = to.to_string();
                    services::apply_transition(
                        &mut tx,
                        service.id,
                        &TransitionUpdate {
                            status: to.clone(),
                            properties: None,
                            agent_instance_id: None,
                            agent_instance_data: None,
                            failed_at: Some(Utc::now()),
                        },
                    )
                    .await?;
                    let after = json!({
                        "name": service.name,
                        "status": to,
                        "properties": service.properties,
                    });
                    let mut event =
                        service_event(identity, events::TYPE_SERVICE_TRANSITIONED, &service);
                    event.payload = transition_diff(&before, &after, &to);
                    events::append(&mut tx, &event).await?;
                }
                let mut event = service_event(identity, events::TYPE_JOB_FAILED, &service);
                event.entity_id = Some(job.id);
                event.payload = json!({
                    "jobId": job.id,
                    "action": job.action,
                    "serviceId": service.id,
                    "error": message,
                });
                events::append(&mut tx, &event).await?;
            }
        }
        tx.commit().await.map_err(AppError::from)?;
        jobs::get_by_id(&self.pool, job_id).await
    }

    /// Fails every job stuck in pending/processing past `threshold` and runs
    /// each service's declared error path. Returns the affected count.
    pub async fn fail_timed_out_jobs(&self, threshold: Duration) -> AppResult<u64> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let stuck = jobs::stuck_older_than(&mut tx, threshold).await?;
        let mut affected = 0u64;
        for item in stuck {
            jobs::mark_failed(&mut tx, item.id, "timeout").await?;
            let service = services::get_for_update(&mut tx, item.service_id).await?;
            let service_type =
                service_types::get_by_id(&self.pool, service.service_type_id).await?;
            let lifecycle = service_type.lifecycle()?;
            let before = service_state(&service);
            if let Some(to) =
                lifecycle.resolve_error_transition(&service.status, &item.action, "timeout")
            {
                let to = to.to_string();
                services::apply_transition(
                    &mut tx,
                    service.id,
                    &TransitionUpdate {
                        status: to.clone(),
                        properties: None,
                        agent_instance_id: None,
                        agent_instance_data: None,
                        failed_at: Some(Utc::now()),
                    },
                )
                .await?;
                let after = json!({
                    "name": service.name,
                    "status": to,
                    "properties": service.properties,
                });
                let mut event = NewEvent::system(events::TYPE_SERVICE_TRANSITIONED);
                event.entity_id = Some(service.id);
                event.provider_id = Some(service.provider_id);
                event.consumer_id = Some(service.consumer_id);
                event.agent_id = Some(service.agent_id);
                event.payload = transition_diff(&before, &after, &to);
                events::append(&mut tx, &event).await?;
            }
            let mut event = NewEvent::system(events::TYPE_JOB_FAILED);
            event.entity_id = Some(item.id);
            event.provider_id = Some(service.provider_id);
            event.consumer_id = Some(service.consumer_id);
            event.agent_id = Some(service.agent_id);
            event.payload = json!({
                "jobId": item.id,
                "action": item.action,
                "serviceId": service.id,
                "error": "timeout",
            });
            events::append(&mut tx, &event).await?;
            affected += 1;
        }
        tx.commit().await.map_err(AppError::from)?;
        Ok(affected)
    }

    /// Removes a terminally-stopped service and frees its pool values.
    pub async fn delete_service(&self, identity: &Identity, service_id: Uuid) -> AppResult<()> {
        let existing = services::get_by_id(&self.pool, service_id).await?;
        authorize(
            identity,
            Action::Delete,
            ObjectType::Service,
            Some(&existing.scope()),
        )?;
        let service_type = service_types::get_by_id(&self.pool, existing.service_type_id).await?;
        let lifecycle = service_type.lifecycle()?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let service = services::get_for_update(&mut tx, service_id).await?;
        if !lifecycle.is_terminal(&service.status) {
            return Err(AppError::Conflict(format!(
                "service is not in a terminal state: {}",
                service.status
            )));
        }
        pools::release_for_service(&mut tx, service.id).await?;
        services::delete(&mut tx, service.id).await?;
        let mut event = service_event(identity, events::TYPE_SERVICE_DELETED, &service);
        event.payload = json!({
            "diff": diff(&service_state(&service), &json!({})),
        });
        events::append(&mut tx, &event).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(())
    }

    /// Agent/provider-initiated agent mutation; status changes are recorded
    /// in the event log.
    pub async fn update_agent(
        &self,
        identity: &Identity,
        agent_id: Uuid,
        patch: &AgentPatch,
    ) -> AppResult<Agent> {
        let existing = agents::get_by_id(&self.pool, agent_id).await?;
        authorize(
            identity,
            Action::Update,
            ObjectType::Agent,
            Some(&ObjectScope {
                provider_id: Some(existing.provider_id),
                agent_id: Some(existing.id),
                ..Default::default()
            }),
        )?;
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;
        let updated = agents::update(&mut tx, agent_id, patch).await?;
        if let Some(status) = &patch.status {
            if *status != existing.status {
                let mut event =
                    NewEvent::from_identity(identity, events::TYPE_AGENT_STATUS_CHANGED);
                event.entity_id = Some(updated.id);
                event.provider_id = Some(updated.provider_id);
                event.agent_id = Some(updated.id);
                event.payload = json!({
                    "diff": [{"op": "replace", "path": "/status", "value": status}],
                });
                events::append(&mut tx, &event).await?;
            }
        }
        tx.commit().await.map_err(AppError::from)?;
        Ok(updated)
    }
}
