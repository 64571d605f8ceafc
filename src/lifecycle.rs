use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub action: String,
    #[serde(default)]
    pub on_error: bool,
    /// Narrows an error transition to matching agent error messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error_regexp: Option<String>,
}

/// The state machine attached to a service type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSchema {
    pub initial_state: String,
    pub states: Vec<String>,
    #[serde(default)]
    pub terminal_states: Vec<String>,
    #[serde(default)]
    pub running_states: Vec<String>,
    pub transitions: Vec<Transition>,
}

impl LifecycleSchema {
    pub fn parse(value: &Value) -> AppResult<Self> {
        let schema: LifecycleSchema = serde_json::from_value(value.clone())
            .map_err(|e| AppError::BadRequest(format!("malformed lifecycle schema: {e}")))?;
        schema.check()?;
        Ok(schema)
    }

    fn check(&self) -> AppResult<()> {
        if !self.states.contains(&self.initial_state) {
            return Err(AppError::BadRequest(
                "lifecycle initial state is not a declared state".into(),
            ));
        }
        for t in &self.transitions {
            if !self.states.contains(&t.from) || !self.states.contains(&t.to) {
                return Err(AppError::BadRequest(format!(
                    "transition {}->{} references an undeclared state",
                    t.from, t.to
                )));
            }
        }
        Ok(())
    }

    pub fn has_state(&self, status: &str) -> bool {
        self.states.iter().any(|s| s == status)
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal_states.iter().any(|s| s == status)
    }

    pub fn is_running(&self, status: &str) -> bool {
        self.running_states.iter().any(|s| s == status)
    }

    /// The success target for `action` out of `current`.
    pub fn resolve(&self, current: &str, action: &str) -> AppResult<&str> {
        self.transitions
            .iter()
            .find(|t| !t.on_error && t.from == current && t.action == action)
            .map(|t| t.to.as_str())
            .ok_or_else(|| {
                AppError::InvalidTransition(format!("no transition for {action} from {current}"))
            })
    }

    /// The failure target for `action` out of `current`, if any: regexp
    /// transitions first in declaration order, then the bare error
    /// transition. `None` means the status stays put.
    pub fn resolve_error_transition(
        &self,
        current: &str,
        action: &str,
        error_message: &str,
    ) -> Option<&str> {
        let candidates: Vec<&Transition> = self
            .transitions
            .iter()
            .filter(|t| t.on_error && t.from == current && t.action == action)
            .collect();
        for t in &candidates {
            if let Some(pattern) = &t.on_error_regexp {
                if Regex::new(pattern)
                    .map(|re| re.is_match(error_message))
                    .unwrap_or(false)
                {
                    return Some(t.to.as_str());
                }
            }
        }
        candidates
            .iter()
            .find(|t| t.on_error_regexp.is_none())
            .map(|t| t.to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm_lifecycle() -> LifecycleSchema {
        LifecycleSchema::parse(&json!({
            "initialState": "New",
            "states": ["New", "Creating", "Stopped", "Starting", "Running", "Stopping", "Failed", "Deleted"],
            "terminalStates": ["Deleted", "Failed"],
            "runningStates": ["Running"],
            "transitions": [
                {"from": "New", "to": "Creating", "action": "create"},
                {"from": "Creating", "to": "Stopped", "action": "create"},
                {"from": "Stopped", "to": "Starting", "action": "start"},
                {"from": "Starting", "to": "Running", "action": "start"},
                {"from": "Running", "to": "Stopping", "action": "stop"},
                {"from": "Stopping", "to": "Stopped", "action": "stop"},
                {"from": "Stopped", "to": "Deleted", "action": "delete"},
                {"from": "Starting", "to": "Failed", "action": "start",
                 "onError": true, "onErrorRegexp": "quota.*exceeded"},
                {"from": "Starting", "to": "Stopped", "action": "start", "onError": true}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_the_declared_target() {
        let lc = vm_lifecycle();
        assert_eq!(lc.resolve("Stopped", "start").unwrap(), "Starting");
        assert!(matches!(
            lc.resolve("Running", "start"),
            Err(AppError::InvalidTransition(_))
        ));
    }

    #[test]
    fn regexp_error_transition_wins_over_bare() {
        let lc = vm_lifecycle();
        assert_eq!(
            lc.resolve_error_transition("Starting", "start", "quota usage exceeded"),
            Some("Failed")
        );
        assert_eq!(
            lc.resolve_error_transition("Starting", "start", "disk on fire"),
            Some("Stopped")
        );
        assert_eq!(lc.resolve_error_transition("Running", "stop", "boom"), None);
    }

    #[test]
    fn state_classifications() {
        let lc = vm_lifecycle();
        assert!(lc.is_running("Running"));
        assert!(!lc.is_running("Stopped"));
        assert!(lc.is_terminal("Deleted"));
        assert!(lc.has_state("Creating"));
        assert!(!lc.has_state("Hibernating"));
    }

    #[test]
    fn rejects_undeclared_states() {
        let bad = json!({
            "initialState": "New",
            "states": ["New"],
            "transitions": [{"from": "New", "to": "Gone", "action": "delete"}]
        });
        assert!(LifecycleSchema::parse(&bad).is_err());
    }
}
