//! Controller definition types
//!
//! A [`CompositeController`] describes one declarative controller: which
//! parent resource it watches, which child resources it may own, which
//! decision hooks to call, and how updates to existing children are rolled
//! out. These types deserialize from the controller's own custom resource.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use drover_hooks::WebhookConfig;

/// API group owning our annotations, labels, and bookkeeping resources.
pub const API_GROUP: &str = "drover.io";

/// Label key recording the parent's API group on revision objects.
pub const LABEL_API_GROUP: &str = "drover.io/apiGroup";

/// Label key recording the parent's resource name on revision objects.
pub const LABEL_RESOURCE: &str = "drover.io/resource";

/// Label applied to children when selector generation is enabled.
pub const LABEL_CONTROLLER_UID: &str = "controller-uid";

/// A declarative controller definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeController {
    pub metadata: ControllerMeta,
    pub spec: CompositeControllerSpec,
}

/// The subset of object metadata a controller definition needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerMeta {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeControllerSpec {
    pub parent_resource: ParentResourceRule,

    #[serde(default)]
    pub child_resources: Vec<ChildResourceRule>,

    #[serde(default)]
    pub hooks: ControllerHooks,

    /// Interval for periodic full resyncs even when nothing changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_period_seconds: Option<u32>,

    /// Select children by a generated `controller-uid` label instead of
    /// requiring `spec.selector` on every parent object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_selector: Option<bool>,
}

impl CompositeController {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn generates_selector(&self) -> bool {
        self.spec.generate_selector.unwrap_or(false)
    }

    pub fn resync_period(&self) -> Option<Duration> {
        self.spec
            .resync_period_seconds
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(u64::from(secs)))
    }
}

/// One watched resource, named the way the API server names it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    pub api_version: String,
    pub resource: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentResourceRule {
    #[serde(flatten)]
    pub rule: ResourceRule,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history: Option<RevisionHistory>,
}

impl ParentResourceRule {
    /// Field paths captured in revision patches, defaulting to all of `spec`.
    pub fn revision_field_paths(&self) -> Vec<String> {
        match &self.revision_history {
            Some(history) if !history.field_paths.is_empty() => history.field_paths.clone(),
            _ => vec!["spec".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionHistory {
    #[serde(default)]
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildResourceRule {
    #[serde(flatten)]
    pub rule: ResourceRule,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<ChildUpdateStrategy>,
}

/// How an existing child is brought in line with new desired state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildUpdateMethod {
    /// Never touch an existing child; wait for someone else to delete it.
    #[default]
    OnDelete,
    /// Delete now, recreate on a later pass once it's gone.
    Recreate,
    /// Send the merged object as an update.
    InPlace,
    /// Like Recreate, but children migrate between revisions gradually.
    RollingRecreate,
    /// Like InPlace, but children migrate between revisions gradually.
    RollingInPlace,
}

impl ChildUpdateMethod {
    pub fn is_rolling(self) -> bool {
        matches!(
            self,
            ChildUpdateMethod::RollingRecreate | ChildUpdateMethod::RollingInPlace
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildUpdateStrategy {
    #[serde(default)]
    pub method: ChildUpdateMethod,

    #[serde(default)]
    pub status_checks: StatusChecks,
}

/// Health criteria a child must pass before a rollout advances past it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChecks {
    #[serde(default)]
    pub conditions: Vec<ConditionCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCheck {
    /// Condition type that must be present on the child's status.
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Required condition status, if any (e.g. "True").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Required condition reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<HookRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<HookRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

/// Key shared by the strategy map and revision claim maps. The version is
/// deliberately dropped so a kind served at several versions resolves to one
/// entry.
pub fn group_kind_key(api_group: &str, kind: &str) -> String {
    format!("{kind}.{api_group}")
}

/// Split an `apiVersion` string into (group, version). Legacy core resources
/// have no group segment.
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Resolved per-kind update strategies.
///
/// Lookups fall back to a default entry registered under the empty key, and
/// then to [`ChildUpdateMethod::OnDelete`].
#[derive(Debug, Clone, Default)]
pub struct UpdateStrategyMap {
    strategies: HashMap<String, ChildUpdateStrategy>,
}

impl UpdateStrategyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, api_group: &str, kind: &str, strategy: ChildUpdateStrategy) {
        self.strategies
            .insert(group_kind_key(api_group, kind), strategy);
    }

    /// Register the strategy used when no per-kind entry matches.
    pub fn insert_default(&mut self, strategy: ChildUpdateStrategy) {
        self.strategies.insert(String::new(), strategy);
    }

    pub fn get(&self, api_group: &str, kind: &str) -> Option<&ChildUpdateStrategy> {
        self.strategies
            .get(&group_kind_key(api_group, kind))
            .or_else(|| self.strategies.get(""))
    }

    pub fn method(&self, api_group: &str, kind: &str) -> ChildUpdateMethod {
        self.get(api_group, kind)
            .map(|strategy| strategy.method)
            .unwrap_or_default()
    }

    pub fn is_rolling(&self, api_group: &str, kind: &str) -> bool {
        self.method(api_group, kind).is_rolling()
    }

    /// True if any watched child kind migrates gradually between revisions.
    pub fn any_rolling(&self) -> bool {
        self.strategies
            .values()
            .any(|strategy| strategy.method.is_rolling())
    }
}
