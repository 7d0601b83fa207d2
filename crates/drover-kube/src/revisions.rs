//! The persisted ControllerRevision record
//!
//! A ControllerRevision snapshots one "shape" of a parent: the values of its
//! revision-relevant field paths, plus the names of the children still
//! reconciled against that shape. Revisions are plain namespaced objects
//! read and written through the same [`crate::cluster::ClusterDriver`] used
//! for children; this module gives them a typed edge.
//!
//! Names are content-addressed so creation is idempotent: the same parent
//! UID and patch always hash to the same name, and a new parent shape always
//! hashes to a fresh one.

use std::collections::BTreeMap;

use kube::core::{DynamicObject, ObjectMeta, TypeMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::api::{API_GROUP, LABEL_API_GROUP, LABEL_RESOURCE};
use crate::cluster::ResourceKey;
use crate::error::Result;
use crate::object::make_controller_ref;

/// Maximum Kubernetes resource-name length.
const MAX_NAME_LEN: usize = 253;

/// Hex sha1 digest plus the `-` separator.
const HASH_SUFFIX_LEN: usize = 41;

/// The resource key revisions are stored under.
pub fn revision_resource_key() -> ResourceKey {
    ResourceKey::new(
        API_GROUP,
        "v1alpha1",
        "ControllerRevision",
        "controllerrevisions",
        true,
    )
}

/// Child names claimed by a revision, grouped by version-agnostic kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionChildren {
    pub api_group: String,
    pub kind: String,
    #[serde(default)]
    pub names: Vec<String>,
}

/// One persisted parent shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRevision {
    #[serde(flatten)]
    pub types: TypeMeta,
    pub metadata: ObjectMeta,
    /// Sparse patch holding the parent's revision-relevant field paths.
    pub parent_patch: Value,
    #[serde(default)]
    pub children: Vec<RevisionChildren>,
}

impl ControllerRevision {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    /// Decode a revision from its stored dynamic form.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
    }

    /// The dynamic form the cluster driver writes.
    pub fn to_object(&self) -> Result<DynamicObject> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    /// Total claimed child names across all kinds.
    pub fn count_children(&self) -> usize {
        self.children.iter().map(|ck| ck.names.len()).sum()
    }

    /// Claim a child name, creating the kind group if needed. Already-claimed
    /// names are left as they are.
    pub fn add_child(&mut self, api_group: &str, kind: &str, name: &str) {
        let group = match self
            .children
            .iter_mut()
            .find(|ck| ck.api_group == api_group && ck.kind == kind)
        {
            Some(group) => group,
            None => {
                self.children.push(RevisionChildren {
                    api_group: api_group.to_string(),
                    kind: kind.to_string(),
                    names: Vec::new(),
                });
                self.children.last_mut().unwrap()
            }
        };
        if !group.names.iter().any(|n| n == name) {
            group.names.push(name.to_string());
        }
    }

    /// Drop a claimed child name. Unknown kinds or names are a no-op.
    pub fn remove_child(&mut self, api_group: &str, kind: &str, name: &str) {
        if let Some(group) = self
            .children
            .iter_mut()
            .find(|ck| ck.api_group == api_group && ck.kind == kind)
        {
            group.names.retain(|n| n != name);
        }
    }
}

/// Build a fresh revision for the given parent shape. The caller supplies
/// the selector-relevant labels; the parent-type disambiguation labels are
/// always added on top.
pub fn make_revision(
    parent: &DynamicObject,
    parent_key: &ResourceKey,
    patch: Value,
    mut labels: BTreeMap<String, String>,
) -> Result<ControllerRevision> {
    labels.insert(LABEL_API_GROUP.to_string(), parent_key.group.clone());
    labels.insert(LABEL_RESOURCE.to_string(), parent_key.plural.clone());

    let controller_ref = make_controller_ref(parent)?;
    let name = revision_name(
        parent_key,
        parent.metadata.uid.as_deref().unwrap_or_default(),
        &patch,
    )?;

    Ok(ControllerRevision {
        types: TypeMeta {
            api_version: revision_resource_key().api_version(),
            kind: "ControllerRevision".to_string(),
        },
        metadata: ObjectMeta {
            name: Some(name),
            namespace: parent.metadata.namespace.clone(),
            labels: Some(labels),
            owner_references: Some(vec![controller_ref]),
            ..Default::default()
        },
        parent_patch: patch,
        children: Vec::new(),
    })
}

/// Content-addressed revision name: `<resource>.<group>-<sha1 hex>`.
///
/// The prefix exists only to lend some sanity to listings; the hash carries
/// the identity. The prefix is truncated so the whole name fits the 253-char
/// resource-name limit.
pub fn revision_name(parent_key: &ResourceKey, parent_uid: &str, patch: &Value) -> Result<String> {
    let api_group = if parent_key.group.is_empty() {
        "core"
    } else {
        &parent_key.group
    };
    let mut prefix = format!("{}.{}", parent_key.plural, api_group);
    prefix.truncate(MAX_NAME_LEN - HASH_SUFFIX_LEN);

    let patch_bytes = serde_json::to_vec(patch)?;
    // The parent UID is mixed in because parent names can collide across
    // resources. The hash is only used for idempotent creation, not lookup,
    // so it doesn't matter that the UID won't match after adoption.
    let mut hasher = Sha1::new();
    hasher.update(parent_uid.as_bytes());
    hasher.update(&patch_bytes);
    Ok(format!("{prefix}-{}", hex::encode(hasher.finalize())))
}
