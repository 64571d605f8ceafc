use serde_json::{json, Value};

/// Builds a JSON-patch-style op list describing how `before` became `after`.
/// Objects are compared field by field with nested paths; arrays and scalars
/// are replaced wholesale.
pub fn diff(before: &Value, after: &Value) -> Vec<Value> {
    let mut ops = Vec::new();
    diff_at("", before, after, &mut ops);
    ops
}

fn diff_at(path: &str, before: &Value, after: &Value, ops: &mut Vec<Value>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for (key, before_value) in b {
                let child = format!("{path}/{key}");
                match a.get(key) {
                    Some(after_value) => diff_at(&child, before_value, after_value, ops),
                    None => ops.push(json!({"op": "remove", "path": child})),
                }
            }
            for (key, after_value) in a {
                if !b.contains_key(key) {
                    let child = format!("{path}/{key}");
                    ops.push(json!({"op": "add", "path": child, "value": after_value}));
                }
            }
        }
        _ if before != after => {
            let path = if path.is_empty() { "/" } else { path };
            ops.push(json!({"op": "replace", "path": path, "value": after}));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_produce_no_ops() {
        let v = json!({"a": 1, "b": {"c": true}});
        assert!(diff(&v, &v).is_empty());
    }

    #[test]
    fn field_change_is_a_replace_at_the_field_path() {
        let before = json!({"status": "Stopped", "name": "s1"});
        let after = json!({"status": "Running", "name": "s1"});
        let ops = diff(&before, &after);
        assert_eq!(
            ops,
            vec![json!({"op": "replace", "path": "/status", "value": "Running"})]
        );
    }

    #[test]
    fn additions_and_removals_are_reported() {
        let before = json!({"a": 1, "gone": 2});
        let after = json!({"a": 1, "fresh": 3});
        let ops = diff(&before, &after);
        assert!(ops.contains(&json!({"op": "remove", "path": "/gone"})));
        assert!(ops.contains(&json!({"op": "add", "path": "/fresh", "value": 3})));
    }

    #[test]
    fn nested_changes_carry_nested_paths() {
        let before = json!({"properties": {"cpu": 2, "memory": 1024}});
        let after = json!({"properties": {"cpu": 4, "memory": 1024}});
        let ops = diff(&before, &after);
        assert_eq!(
            ops,
            vec![json!({"op": "replace", "path": "/properties/cpu", "value": 4})]
        );
    }
}
