//! Client-side "apply" - a dynamic three-way merge.
//!
//! A decision function only ever returns the *partial* object it cares
//! about. To turn that into a full update we merge it against what the
//! cluster currently holds (observed) and what we asked for last time
//! (last-applied), in the style of `kubectl apply`:
//!
//! - fields we set before but no longer want are removed
//! - fields we never touched are left alone, whoever owns them
//! - lists of objects keyed by a `name` field are merged element-wise;
//!   anything else is replaced wholesale
//!
//! The merge is done locally and produces a complete object with the
//! ResourceVersion intact, so the caller can send a plain update instead
//! of a server-side patch.

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Annotation holding the JSON serialization of the most recent desired
/// partial object. Written on create, refreshed on update, read only here.
pub const LAST_APPLIED_ANNOTATION: &str = "drover.io/last-applied-configuration";

/// Parses the last-applied annotation payload.
pub fn parse_last_applied(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).map_err(CoreError::LastApplied)
}

/// Renders a desired partial object into the annotation payload.
pub fn render_last_applied(desired: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(desired)?)
}

/// Strips the last-applied annotation from a recorded desired object so the
/// stored blob never embeds an older copy of itself.
pub fn sanitize_last_applied(last_applied: &mut Map<String, Value>) {
    if let Some(annotations) = last_applied
        .get_mut("metadata")
        .and_then(|m| m.get_mut("annotations"))
        .and_then(Value::as_object_mut)
    {
        annotations.remove(LAST_APPLIED_ANNOTATION);
    }
}

/// Computes the three-way merge of (observed, last-applied, desired).
///
/// Returns an updated deep copy of `observed`; the input is never mutated.
pub fn merge(
    observed: &Map<String, Value>,
    last_applied: &Map<String, Value>,
    desired: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let destination = observed.clone();
    merge_object("", destination, Some(last_applied), Some(desired))
}

/// Merges one value position. Dispatch is on the *destination* type: the
/// other two sides must agree with it (or be null), anything else is a
/// conflict the caller has to resolve by deleting the object.
fn merge_value(path: &str, destination: Value, last_applied: &Value, desired: &Value) -> Result<Value> {
    match destination {
        Value::Object(dest) => {
            let last = as_object_or_null("lastApplied", path, last_applied)?;
            let des = as_object_or_null("desired", path, desired)?;
            Ok(Value::Object(merge_object(path, dest, last, des)?))
        }
        Value::Array(dest) => {
            let last = as_array_or_null("lastApplied", path, last_applied)?;
            let des = as_array_or_null("desired", path, desired)?;
            let all_list_maps = is_list_map(&dest)
                && last.is_some_and(|l| is_list_map(l))
                && des.is_some_and(|d| is_list_map(d));
            if all_list_maps {
                // The three unwrapped sides are guaranteed by the check above.
                let (Some(last), Some(des)) = (last, des) else {
                    return Ok(desired.clone());
                };
                Ok(Value::Array(merge_list_map(path, dest, last, des)?))
            } else {
                // A normal array is replaced, not merged.
                Ok(desired.clone())
            }
        }
        // Scalar or null: just take the desired value.
        _ => Ok(desired.clone()),
    }
}

fn merge_object(
    path: &str,
    mut destination: Map<String, Value>,
    last_applied: Option<&Map<String, Value>>,
    desired: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>> {
    // Remove fields that were in last-applied but are no longer desired.
    if let Some(last) = last_applied {
        for key in last.keys() {
            if !desired.is_some_and(|d| d.contains_key(key)) {
                destination.remove(key);
            }
        }
    }

    // Add or update every desired field.
    if let Some(des) = desired {
        for (key, desired_value) in des {
            let child_path = format!("{path}[{key}]");
            let dest_value = destination.remove(key).unwrap_or(Value::Null);
            let last_value = last_applied
                .and_then(|l| l.get(key))
                .unwrap_or(&Value::Null);
            let merged = merge_value(&child_path, dest_value, last_value, desired_value)?;
            destination.insert(key.clone(), merged);
        }
    }

    Ok(destination)
}

fn merge_list_map(
    path: &str,
    destination: Vec<Value>,
    last_applied: &[Value],
    desired: &[Value],
) -> Result<Vec<Value>> {
    // Treat each list as a map keyed by the "name" field.
    let last_map = make_list_map(last_applied);
    let desired_map = make_list_map(desired);
    let mut merged = merge_object(
        path,
        make_list_map(&destination),
        Some(&last_map),
        Some(&desired_map),
    )?;

    // Rebuild a list: destination elements that survived keep their relative
    // order, then newly desired elements follow.
    let mut result = Vec::with_capacity(merged.len());
    for item in &destination {
        let Some(name) = list_map_key(item) else {
            continue;
        };
        if let Some(new_item) = merged.remove(name) {
            result.push(new_item);
        }
    }
    for item in desired {
        let Some(name) = list_map_key(item) else {
            continue;
        };
        if let Some(new_item) = merged.remove(name) {
            result.push(new_item);
        }
    }
    Ok(result)
}

fn make_list_map(list: &[Value]) -> Map<String, Value> {
    let mut map = Map::new();
    for item in list {
        if let Some(name) = list_map_key(item) {
            map.insert(name.to_string(), item.clone());
        }
    }
    map
}

/// The merge key of a list-map element: a string `name` field on an object.
fn list_map_key(item: &Value) -> Option<&str> {
    item.as_object()?.get("name")?.as_str()
}

/// Guesses whether a list is a Kubernetes-style "list map" (container
/// lists, volume lists, ...). An empty list answers no: we can't prove
/// anything about it, so it falls back to wholesale replacement.
fn is_list_map(list: &[Value]) -> bool {
    !list.is_empty() && list.iter().all(|item| list_map_key(item).is_some())
}

fn as_object_or_null<'a>(
    side: &'static str,
    path: &str,
    value: &'a Value,
) -> Result<Option<&'a Map<String, Value>>> {
    match value {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => Err(type_mismatch(side, path, "object", other)),
    }
}

fn as_array_or_null<'a>(
    side: &'static str,
    path: &str,
    value: &'a Value,
) -> Result<Option<&'a Vec<Value>>> {
    match value {
        Value::Array(list) => Ok(Some(list)),
        Value::Null => Ok(None),
        other => Err(type_mismatch(side, path, "array", other)),
    }
}

fn type_mismatch(side: &'static str, path: &str, expected: &'static str, found: &Value) -> CoreError {
    CoreError::MergeTypeMismatch {
        side,
        path: path.to_string(),
        expected,
        found: json_kind(found),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
