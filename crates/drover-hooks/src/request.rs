//! Request/response envelopes for the decision function.
//!
//! The engine never interprets the objects it ships across this boundary;
//! everything is a JSON tree. Children are grouped by kind
//! (`Kind.group/version`, `Kind.version` for the core group) and keyed by
//! name relative to the parent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Objects grouped by kind key, then by relative name.
pub type ObjectMap = BTreeMap<String, BTreeMap<String, Value>>;

/// Builds the kind key for an [`ObjectMap`] bucket.
pub fn object_map_key(kind: &str, api_version: &str) -> String {
    format!("{kind}.{api_version}")
}

/// One reconciliation question: "given this parent and these observed
/// children, what should exist?"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// The controller definition this request is made on behalf of.
    pub controller: Value,
    /// The parent object, possibly a materialized historical revision.
    pub parent: Value,
    /// Observed children currently claimed for this parent.
    pub children: ObjectMap,
    /// Related objects selected for context; never reconciled.
    pub related: ObjectMap,
    /// True when this is a finalize call for a parent pending deletion.
    pub finalizing: bool,
}

/// The decision function's answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncResponse {
    /// Desired parent `.status`; absent means "empty".
    pub status: Option<Value>,
    /// Full desired child objects. Null entries are tolerated and skipped.
    pub children: Vec<Value>,
    /// Request a resync after this many seconds; 0 means none.
    pub resync_after_seconds: f64,
    /// For finalize calls: true once cleanup is complete.
    pub finalized: bool,
}

impl SyncResponse {
    /// The desired children with null entries dropped.
    pub fn present_children(&self) -> impl Iterator<Item = &Value> {
        self.children.iter().filter(|child| !child.is_null())
    }
}
