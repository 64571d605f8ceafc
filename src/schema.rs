use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult, ValidationError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// Who supplies a property's value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    #[default]
    Input,
    Agent,
    Pool,
    Generated,
}

/// When a property may change after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case", tag = "policy")]
pub enum UpdatePolicy {
    #[default]
    Always,
    Never,
    InStates {
        states: Vec<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Validators {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(rename = "enum")]
    pub one_of: Option<Vec<Value>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub source: PropertySource,
    #[serde(default)]
    pub update: UpdatePolicy,
    #[serde(default)]
    pub secret: bool,
    /// Pool type this property draws from; only meaningful for pool source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_type: Option<String>,
    /// Lifecycle action to enqueue when this property changes on a live
    /// service. Absent means the change is bookkeeping only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update_action: Option<String>,
    #[serde(default)]
    pub validators: Validators,
    /// Child properties for object-typed nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDef>,
    /// Item schema for array-typed nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertyDef>>,
}

/// Root of a service type's property schema: named top-level properties.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PropertySchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
}

/// Outcome of merging an update patch over the current property tree.
#[derive(Debug)]
pub struct MergeOutcome {
    pub merged: Value,
    /// Top-level property names whose value changed.
    pub changed: Vec<String>,
    /// Lifecycle actions requested by changed properties, deduplicated.
    pub actions: Vec<String>,
}

impl PropertySchema {
    pub fn parse(value: &Value) -> AppResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| AppError::BadRequest(format!("malformed property schema: {e}")))
    }

    /// Create-mode validation: the caller supplies every required
    /// input-source property and nothing that the system or the agent owns.
    pub fn validate_create(&self, input: &Value) -> AppResult<()> {
        let mut errors = Vec::new();
        let obj = match input {
            Value::Object(map) => map,
            _ => {
                return Err(AppError::Validation(vec![ValidationError {
                    path: "/".into(),
                    message: "properties must be an object".into(),
                }]))
            }
        };
        for (name, def) in &self.properties {
            let path = format!("/{name}");
            match (def.source, obj.get(name)) {
                (PropertySource::Input, None) if def.required => errors.push(ValidationError {
                    path,
                    message: "required property is missing".into(),
                }),
                (PropertySource::Input, Some(value)) => {
                    validate_value(def, value, &path, &mut errors)
                }
                (PropertySource::Input, None) => {}
                (_, Some(_)) => errors.push(ValidationError {
                    path,
                    message: "property is not caller-supplied".into(),
                }),
                (_, None) => {}
            }
        }
        for name in obj.keys() {
            if !self.properties.contains_key(name) {
                errors.push(ValidationError {
                    path: format!("/{name}"),
                    message: "unknown property".into(),
                });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }

    /// Apply-mode: merges `patch` over `current`, enforcing each changed
    /// property's update policy against the service's present status.
    pub fn merge_update(
        &self,
        current: &Value,
        patch: &Value,
        status: &str,
    ) -> AppResult<MergeOutcome> {
        let patch_obj = match patch {
            Value::Object(map) => map,
            _ => return Err(AppError::BadRequest("patch must be an object".into())),
        };
        let mut merged = match current {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let mut changed = Vec::new();
        let mut actions = Vec::new();
        let mut errors = Vec::new();
        for (name, value) in patch_obj {
            let Some(def) = self.properties.get(name) else {
                errors.push(ValidationError {
                    path: format!("/{name}"),
                    message: "unknown property".into(),
                });
                continue;
            };
            if def.source != PropertySource::Input {
                errors.push(ValidationError {
                    path: format!("/{name}"),
                    message: "property is not caller-supplied".into(),
                });
                continue;
            }
            if merged.get(name) == Some(value) {
                continue;
            }
            match &def.update {
                UpdatePolicy::Always => {}
                UpdatePolicy::Never => {
                    return Err(AppError::Immutable(format!(
                        "property {name} cannot be updated"
                    )))
                }
                UpdatePolicy::InStates { states } => {
                    if !states.iter().any(|s| s == status) {
                        return Err(AppError::Immutable(format!(
                            "property {name} cannot be updated in status {status}"
                        )));
                    }
                }
            }
            let path = format!("/{name}");
            validate_value(def, value, &path, &mut errors);
            if value.is_null() && !def.required {
                merged.remove(name);
            } else {
                merged.insert(name.clone(), value.clone());
            }
            changed.push(name.clone());
            if let Some(action) = &def.on_update_action {
                if !actions.contains(action) {
                    actions.push(action.clone());
                }
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(MergeOutcome {
            merged: Value::Object(merged),
            changed,
            actions,
        })
    }

    /// Agent-reported property merge: only agent-source properties accepted.
    pub fn merge_agent_properties(&self, current: &Value, reported: &Value) -> AppResult<Value> {
        let reported_obj = match reported {
            Value::Object(map) => map,
            _ => return Err(AppError::BadRequest("agent properties must be an object".into())),
        };
        let mut merged = match current {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let mut errors = Vec::new();
        for (name, value) in reported_obj {
            match self.properties.get(name) {
                Some(def) if def.source == PropertySource::Agent => {
                    let path = format!("/{name}");
                    validate_value(def, value, &path, &mut errors);
                    merged.insert(name.clone(), value.clone());
                }
                Some(_) => errors.push(ValidationError {
                    path: format!("/{name}"),
                    message: "property is not agent-supplied".into(),
                }),
                None => errors.push(ValidationError {
                    path: format!("/{name}"),
                    message: "unknown property".into(),
                }),
            }
        }
        if errors.is_empty() {
            Ok(Value::Object(merged))
        } else {
            Err(AppError::Validation(errors))
        }
    }

    /// Required pool-source properties: `(name, pool type)`.
    pub fn pool_properties(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .filter(|(_, def)| def.source == PropertySource::Pool && def.required)
            .map(|(name, def)| {
                let pool_type = def.pool_type.clone().unwrap_or_else(|| name.clone());
                (name.clone(), pool_type)
            })
            .collect()
    }

    /// Caller-supplied properties flagged secret; their values move to the
    /// vault and are replaced by opaque references.
    pub fn secret_properties(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, def)| def.secret && def.source == PropertySource::Input)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn type_matches(def: &PropertyDef, value: &Value) -> bool {
    match def.property_type {
        PropertyType::String => value.is_string(),
        PropertyType::Integer => value.is_i64() || value.is_u64(),
        PropertyType::Number => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::Array => value.is_array(),
        PropertyType::Object => value.is_object(),
    }
}

fn validate_value(def: &PropertyDef, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    if value.is_null() {
        if def.required {
            errors.push(ValidationError {
                path: path.into(),
                message: "required property is null".into(),
            });
        }
        return;
    }
    if !type_matches(def, value) {
        errors.push(ValidationError {
            path: path.into(),
            message: format!("expected {:?}", def.property_type).to_lowercase(),
        });
        return;
    }
    let v = &def.validators;
    if let Some(s) = value.as_str() {
        if let Some(min) = v.min_length {
            if s.chars().count() < min {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("shorter than minLength {min}"),
                });
            }
        }
        if let Some(max) = v.max_length {
            if s.chars().count() > max {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("longer than maxLength {max}"),
                });
            }
        }
        if let Some(pattern) = &v.pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        errors.push(ValidationError {
                            path: path.into(),
                            message: format!("does not match pattern {pattern}"),
                        });
                    }
                }
                Err(_) => errors.push(ValidationError {
                    path: path.into(),
                    message: "schema pattern is not a valid regex".into(),
                }),
            }
        }
    }
    if let Some(n) = value.as_f64() {
        if let Some(min) = v.min {
            if n < min {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("below min {min}"),
                });
            }
        }
        if let Some(max) = v.max {
            if n > max {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("above max {max}"),
                });
            }
        }
    }
    if let Some(allowed) = &v.one_of {
        if !allowed.contains(value) {
            errors.push(ValidationError {
                path: path.into(),
                message: "not one of the allowed values".into(),
            });
        }
    }
    if let Some(array) = value.as_array() {
        if let Some(min) = v.min_items {
            if array.len() < min {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("fewer than minItems {min}"),
                });
            }
        }
        if let Some(max) = v.max_items {
            if array.len() > max {
                errors.push(ValidationError {
                    path: path.into(),
                    message: format!("more than maxItems {max}"),
                });
            }
        }
        if let Some(item_def) = &def.items {
            for (i, item) in array.iter().enumerate() {
                validate_value(item_def, item, &format!("{path}/{i}"), errors);
            }
        }
    }
    if let Some(object) = value.as_object() {
        if !def.properties.is_empty() {
            for (name, child) in &def.properties {
                let child_path = format!("{path}/{name}");
                match object.get(name) {
                    Some(child_value) => validate_value(child, child_value, &child_path, errors),
                    None if child.required => errors.push(ValidationError {
                        path: child_path,
                        message: "required property is missing".into(),
                    }),
                    None => {}
                }
            }
            for name in object.keys() {
                if !def.properties.contains_key(name) {
                    errors.push(ValidationError {
                        path: format!("{path}/{name}"),
                        message: "unknown property".into(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm_schema() -> PropertySchema {
        PropertySchema::parse(&json!({
            "properties": {
                "cpu": {"type": "integer", "required": true,
                        "validators": {"min": 1, "max": 64},
                        "update": {"policy": "in-states", "states": ["Stopped"]}},
                "memory": {"type": "integer", "required": true, "validators": {"min": 128}},
                "image": {"type": "string", "required": true,
                          "update": {"policy": "never"},
                          "validators": {"pattern": "^[a-z][a-z0-9-]*$"}},
                "labels": {"type": "array", "items": {"type": "string"},
                           "validators": {"maxItems": 4}},
                "ip": {"type": "string", "source": "pool", "required": true, "poolType": "ipv4"},
                "hostKey": {"type": "string", "source": "agent"},
                "adminPassword": {"type": "string", "secret": true,
                                  "validators": {"minLength": 8}},
                "network": {"type": "object", "properties": {
                    "vlan": {"type": "integer", "required": true},
                    "mtu": {"type": "integer"}
                }}
            }
        }))
        .unwrap()
    }

    #[test]
    fn create_accepts_well_formed_input() {
        let schema = vm_schema();
        let input = json!({
            "cpu": 2, "memory": 1024, "image": "ubuntu",
            "labels": ["web"], "adminPassword": "hunter22!",
            "network": {"vlan": 12}
        });
        assert!(schema.validate_create(&input).is_ok());
    }

    #[test]
    fn create_collects_all_errors() {
        let schema = vm_schema();
        let input = json!({
            "cpu": 0,
            "image": "Ubuntu LTS",
            "labels": ["a", "b", "c", "d", "e"],
            "ip": "10.0.0.1",
            "hostKey": "x",
            "bogus": 1
        });
        let err = schema.validate_create(&input).unwrap_err();
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"/cpu"), "min violation: {paths:?}");
        assert!(paths.contains(&"/memory"), "missing required: {paths:?}");
        assert!(paths.contains(&"/image"), "pattern violation: {paths:?}");
        assert!(paths.contains(&"/labels"), "maxItems violation: {paths:?}");
        assert!(paths.contains(&"/ip"), "pool source supplied: {paths:?}");
        assert!(paths.contains(&"/hostKey"), "agent source supplied: {paths:?}");
        assert!(paths.contains(&"/bogus"), "unknown property: {paths:?}");
    }

    #[test]
    fn validation_is_idempotent() {
        let schema = vm_schema();
        let input = json!({"cpu": 2, "memory": 1024, "image": "ubuntu"});
        let first = schema.validate_create(&input).is_ok();
        let second = schema.validate_create(&input).is_ok();
        assert_eq!(first, second);
    }

    #[test]
    fn nested_object_errors_carry_full_path() {
        let schema = vm_schema();
        let input = json!({
            "cpu": 2, "memory": 1024, "image": "ubuntu",
            "network": {"mtu": 1500}
        });
        let AppError::Validation(errors) = schema.validate_create(&input).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].path, "/network/vlan");
    }

    #[test]
    fn update_policy_gates_on_status() {
        let schema = vm_schema();
        let current = json!({"cpu": 2, "memory": 1024, "image": "ubuntu"});
        let patch = json!({"cpu": 4});
        assert!(schema.merge_update(&current, &patch, "Stopped").is_ok());
        let err = schema.merge_update(&current, &patch, "Running").unwrap_err();
        assert!(matches!(err, AppError::Immutable(_)));
    }

    #[test]
    fn never_policy_rejects_any_change() {
        let schema = vm_schema();
        let current = json!({"cpu": 2, "memory": 1024, "image": "ubuntu"});
        let err = schema
            .merge_update(&current, &json!({"image": "debian"}), "Stopped")
            .unwrap_err();
        assert!(matches!(err, AppError::Immutable(_)));
    }

    #[test]
    fn unchanged_value_bypasses_update_policy() {
        let schema = vm_schema();
        let current = json!({"cpu": 2, "memory": 1024, "image": "ubuntu"});
        let outcome = schema
            .merge_update(&current, &json!({"image": "ubuntu", "memory": 2048}), "Stopped")
            .unwrap();
        assert_eq!(outcome.changed, vec!["memory".to_string()]);
    }

    #[test]
    fn agent_merge_rejects_input_properties() {
        let schema = vm_schema();
        let current = json!({"cpu": 2});
        assert!(schema
            .merge_agent_properties(&current, &json!({"hostKey": "ssh-ed25519 AAA"}))
            .is_ok());
        assert!(schema
            .merge_agent_properties(&current, &json!({"cpu": 8}))
            .is_err());
    }

    #[test]
    fn pool_and_secret_collectors() {
        let schema = vm_schema();
        assert_eq!(schema.pool_properties(), vec![("ip".into(), "ipv4".into())]);
        assert_eq!(schema.secret_properties(), vec!["adminPassword".to_string()]);
    }
}
