use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Participant,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Participant => "participant",
            Role::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "admin" => Ok(Role::Admin),
            "participant" => Ok(Role::Participant),
            "agent" => Ok(Role::Agent),
            other => Err(AppError::BadRequest(format!("unknown role: {other}"))),
        }
    }
}

/// The authenticated caller: who they are and which tenant slice they own.
#[derive(Clone, Debug)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub participant_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
}

impl Identity {
    /// Checks the role/scope pairing rules: admins carry no scope,
    /// participants carry a participant id, agents an agent id.
    pub fn validate(&self) -> AppResult<()> {
        match self.role {
            Role::Admin => {
                if self.participant_id.is_some() || self.agent_id.is_some() {
                    return Err(AppError::BadRequest("admin identity must not be scoped".into()));
                }
            }
            Role::Participant => {
                if self.participant_id.is_none() {
                    return Err(AppError::BadRequest(
                        "participant identity requires a participant id".into(),
                    ));
                }
            }
            Role::Agent => {
                if self.agent_id.is_none() {
                    return Err(AppError::BadRequest("agent identity requires an agent id".into()));
                }
            }
        }
        Ok(())
    }

    /// Whether an object with the given ownership coordinates is visible.
    pub fn can_see(&self, object: &ObjectScope) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Participant => {
                let Some(pid) = self.participant_id else {
                    return false;
                };
                object.provider_id == Some(pid)
                    || object.consumer_id == Some(pid)
                    || object.participant_id == Some(pid)
            }
            Role::Agent => {
                self.agent_id.is_some() && object.agent_id == self.agent_id
            }
        }
    }
}

/// Ownership coordinates of an entity, any subset may be present.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectScope {
    pub participant_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub consumer_id: Option<Uuid>,
}

impl ObjectScope {
    pub fn provider(provider_id: Uuid) -> Self {
        Self {
            provider_id: Some(provider_id),
            ..Default::default()
        }
    }

    pub fn participant(participant_id: Uuid) -> Self {
        Self {
            participant_id: Some(participant_id),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(pid: Uuid) -> Identity {
        Identity {
            id: Uuid::now_v7(),
            name: "p".into(),
            role: Role::Participant,
            participant_id: Some(pid),
            agent_id: None,
        }
    }

    #[test]
    fn admin_sees_everything() {
        let admin = Identity {
            id: Uuid::now_v7(),
            name: "root".into(),
            role: Role::Admin,
            participant_id: None,
            agent_id: None,
        };
        assert!(admin.can_see(&ObjectScope::default()));
        assert!(admin.can_see(&ObjectScope::provider(Uuid::now_v7())));
    }

    #[test]
    fn participant_matches_provider_consumer_or_self() {
        let pid = Uuid::now_v7();
        let caller = participant(pid);
        assert!(caller.can_see(&ObjectScope::provider(pid)));
        assert!(caller.can_see(&ObjectScope {
            consumer_id: Some(pid),
            ..Default::default()
        }));
        assert!(caller.can_see(&ObjectScope::participant(pid)));
        assert!(!caller.can_see(&ObjectScope::provider(Uuid::now_v7())));
        assert!(!caller.can_see(&ObjectScope::default()));
    }

    #[test]
    fn agent_matches_own_agent_id_only() {
        let aid = Uuid::now_v7();
        let caller = Identity {
            id: Uuid::now_v7(),
            name: "a".into(),
            role: Role::Agent,
            participant_id: None,
            agent_id: Some(aid),
        };
        assert!(caller.can_see(&ObjectScope {
            agent_id: Some(aid),
            ..Default::default()
        }));
        assert!(!caller.can_see(&ObjectScope {
            agent_id: Some(Uuid::now_v7()),
            ..Default::default()
        }));
        assert!(!caller.can_see(&ObjectScope::default()));
    }

    #[test]
    fn scope_pairing_is_enforced() {
        let mut admin = Identity {
            id: Uuid::now_v7(),
            name: "root".into(),
            role: Role::Admin,
            participant_id: None,
            agent_id: None,
        };
        assert!(admin.validate().is_ok());
        admin.participant_id = Some(Uuid::now_v7());
        assert!(admin.validate().is_err());

        let unscoped = Identity {
            id: Uuid::now_v7(),
            name: "p".into(),
            role: Role::Participant,
            participant_id: None,
            agent_id: None,
        };
        assert!(unscoped.validate().is_err());
    }
}
