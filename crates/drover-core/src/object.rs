//! Helpers for navigating and editing schema-less objects.
//!
//! Everything a controller engine touches is an arbitrary JSON tree
//! (`serde_json::Value`): parents, children, revision patches. This module
//! provides the small set of tree operations the engines share:
//! - nested field access by path segments
//! - dotted field-path extraction/overlay (used for revision patches)
//! - status conditions and `observedGeneration` bookkeeping

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};

/// Walks `root` down the given path segments, returning the nested value.
pub fn get_nested<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for part in path {
        current = current.as_object()?.get(*part)?;
    }
    Some(current)
}

/// Mutable variant of [`get_nested`].
pub fn get_nested_mut<'a>(root: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = root;
    for part in path {
        current = current.as_object_mut()?.get_mut(*part)?;
    }
    Some(current)
}

/// Sets a nested field, creating intermediate objects along the way.
///
/// Fails if an intermediate value exists but is not an object, rather than
/// silently clobbering data that belongs to someone else.
pub fn set_nested(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Err(CoreError::FieldPath {
            path: String::new(),
            message: "empty field path".to_string(),
        });
    };
    let mut current = root;
    for (i, part) in parents.iter().enumerate() {
        let map = current.as_object_mut().ok_or_else(|| CoreError::FieldPath {
            path: path[..=i].join("."),
            message: "intermediate value is not an object".to_string(),
        })?;
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current.as_object_mut().ok_or_else(|| CoreError::FieldPath {
        path: path.join("."),
        message: "intermediate value is not an object".to_string(),
    })?;
    map.insert(last.to_string(), value);
    Ok(())
}

/// Removes a nested field. Missing fields or non-object parents are a no-op.
pub fn remove_nested(root: &mut Value, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for part in parents {
        match current.get_mut(*part) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*last);
    }
}

/// Extracts the values at the given dotted field paths into a sparse patch
/// object. Paths that don't resolve are simply left out of the patch.
pub fn extract_field_paths(src: &Value, field_paths: &[String]) -> Result<Value> {
    let mut patch = Value::Object(Map::new());
    for field_path in field_paths {
        let parts: Vec<&str> = field_path.split('.').collect();
        if let Some(value) = get_nested(src, &parts) {
            set_nested(&mut patch, &parts, value.clone())?;
        }
    }
    Ok(patch)
}

/// Overlays the values a sparse patch holds at the given dotted field paths
/// onto `dest`, replacing whatever was there.
pub fn overlay_field_paths(dest: &mut Value, patch: &Value, field_paths: &[String]) -> Result<()> {
    for field_path in field_paths {
        let parts: Vec<&str> = field_path.split('.').collect();
        if let Some(value) = get_nested(patch, &parts) {
            set_nested(dest, &parts, value.clone())?;
        }
    }
    Ok(())
}

/// Reads `status.observedGeneration`, or 0 if absent or not an integer.
pub fn observed_generation(obj: &Value) -> i64 {
    get_nested(obj, &["status", "observedGeneration"])
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// One entry of the conventional `status.conditions` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl StatusCondition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}

/// Finds a condition by type in an object's `status.conditions`.
pub fn get_status_condition(obj: &Value, condition_type: &str) -> Option<StatusCondition> {
    let conditions = get_nested(obj, &["status", "conditions"])?.as_array()?;
    for item in conditions {
        if item.get("type").and_then(Value::as_str) == Some(condition_type) {
            if let Ok(condition) = serde_json::from_value(item.clone()) {
                return Some(condition);
            }
        }
    }
    None
}

/// Upserts a condition into a status object's `conditions` list, replacing
/// an existing entry of the same type in place.
pub fn set_condition(status: &mut Value, condition: &StatusCondition) {
    let Some(map) = status.as_object_mut() else {
        return;
    };
    let entry = json!(condition);
    let conditions = map
        .entry("conditions")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(items) = conditions.as_array_mut() else {
        return;
    };
    for item in items.iter_mut() {
        if item.get("type").and_then(Value::as_str) == Some(condition.type_.as_str()) {
            *item = entry;
            return;
        }
    }
    items.push(entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_nested() {
        let obj = json!({"spec": {"replicas": 3, "template": {"labels": {"app": "web"}}}});
        assert_eq!(
            get_nested(&obj, &["spec", "replicas"]),
            Some(&json!(3))
        );
        assert_eq!(
            get_nested(&obj, &["spec", "template", "labels", "app"]),
            Some(&json!("web"))
        );
        assert_eq!(get_nested(&obj, &["spec", "missing"]), None);
        assert_eq!(get_nested(&obj, &["spec", "replicas", "deeper"]), None);
    }

    #[test]
    fn test_set_nested_creates_intermediates() {
        let mut obj = json!({});
        set_nested(&mut obj, &["status", "observedGeneration"], json!(7)).unwrap();
        assert_eq!(obj, json!({"status": {"observedGeneration": 7}}));
    }

    #[test]
    fn test_set_nested_rejects_non_object_intermediate() {
        let mut obj = json!({"spec": 42});
        let err = set_nested(&mut obj, &["spec", "replicas"], json!(3)).unwrap_err();
        assert!(matches!(err, CoreError::FieldPath { .. }));
    }

    #[test]
    fn test_remove_nested() {
        let mut obj = json!({"metadata": {"annotations": {"a": "1", "b": "2"}}});
        remove_nested(&mut obj, &["metadata", "annotations", "a"]);
        assert_eq!(obj, json!({"metadata": {"annotations": {"b": "2"}}}));
        // Missing paths are fine.
        remove_nested(&mut obj, &["metadata", "labels", "x"]);
    }

    #[test]
    fn test_extract_and_overlay_field_paths() {
        let parent = json!({
            "spec": {"replicas": 3},
            "status": {"ready": true},
            "metadata": {"name": "p"}
        });
        let paths = vec!["spec".to_string()];
        let patch = extract_field_paths(&parent, &paths).unwrap();
        assert_eq!(patch, json!({"spec": {"replicas": 3}}));

        let mut dest = json!({"spec": {"replicas": 9}, "status": {"ready": false}});
        overlay_field_paths(&mut dest, &patch, &paths).unwrap();
        assert_eq!(dest, json!({"spec": {"replicas": 3}, "status": {"ready": false}}));
    }

    #[test]
    fn test_extract_field_paths_skips_missing() {
        let parent = json!({"spec": {"a": 1}});
        let paths = vec!["spec.a".to_string(), "spec.nope".to_string()];
        let patch = extract_field_paths(&parent, &paths).unwrap();
        assert_eq!(patch, json!({"spec": {"a": 1}}));
    }

    #[test]
    fn test_observed_generation() {
        assert_eq!(observed_generation(&json!({})), 0);
        assert_eq!(
            observed_generation(&json!({"status": {"observedGeneration": 4}})),
            4
        );
        assert_eq!(
            observed_generation(&json!({"status": {"observedGeneration": "4"}})),
            0
        );
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut status = json!({});
        set_condition(
            &mut status,
            &StatusCondition::new("Updated", "False", "RolloutProgressing", "updating Pod web-1"),
        );
        set_condition(
            &mut status,
            &StatusCondition::new("Updated", "True", "OnLatestRevision", ""),
        );
        set_condition(&mut status, &StatusCondition::new("Ready", "True", "", ""));

        let conditions = get_nested(&status, &["conditions"]).unwrap().as_array().unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0]["status"], "True");
        assert_eq!(conditions[0]["reason"], "OnLatestRevision");
    }

    #[test]
    fn test_get_status_condition() {
        let obj = json!({
            "status": {
                "conditions": [
                    {"type": "Ready", "status": "True"},
                    {"type": "Updated", "status": "False", "reason": "RolloutWaiting"}
                ]
            }
        });
        let cond = get_status_condition(&obj, "Updated").unwrap();
        assert_eq!(cond.status, "False");
        assert_eq!(cond.reason, "RolloutWaiting");
        assert!(get_status_condition(&obj, "Missing").is_none());
    }
}
