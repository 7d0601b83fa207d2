//! The per-parent sync pass
//!
//! [`CompositeSyncer`] ties the pieces together for one controller
//! definition: finalizer bookkeeping, child claiming, the revision-tracked
//! decision call, child reconciliation, and the parent status write. One
//! call to [`CompositeSyncer::sync`] handles one parent object, end to end.

pub mod revisions;
pub mod rollout;

pub use revisions::{ChildRef, ParentRevision, RevisionOutcome};
pub use rollout::{DefaultRolloutPolicy, RolloutPolicy};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::{Value, json};

use drover_core::object::get_nested;
use drover_hooks::{DecisionHook, ObjectMap};

use crate::api::{CompositeController, LABEL_CONTROLLER_UID, UpdateStrategyMap, parse_api_version};
use crate::children::ChildReconciler;
use crate::claim::ClaimManager;
use crate::cluster::{ClusterDriver, ResourceKey, update_status_with_retries};
use crate::error::{Result, SyncError};
use crate::finalizer::FinalizerManager;
use crate::object::{ChildMap, display_name, from_value, is_pending_deletion, to_value, uid_of};
use crate::selector::Selector;

use revisions::RevisionEngine;

/// Supplies the read-only related objects shipped with each decision call.
///
/// Related objects give the decision function context it doesn't own, like a
/// ConfigMap it renders templates from. They are never claimed or
/// reconciled.
#[async_trait]
pub trait RelatedObjects: Send + Sync {
    async fn for_parent(&self, parent: &DynamicObject) -> ObjectMap;
}

/// The default: no related objects.
pub struct NoRelatedObjects;

#[async_trait]
impl RelatedObjects for NoRelatedObjects {
    async fn for_parent(&self, _parent: &DynamicObject) -> ObjectMap {
        ObjectMap::new()
    }
}

/// A decision-function answer turned into indexed desired children, plus the
/// original response order for rollout pacing.
pub(crate) struct DesiredSet {
    pub map: ChildMap,
    pub order: Vec<ChildRef>,
}

/// Validate and index the desired children from a decision response.
///
/// Children of a namespaced parent default to the parent's namespace; an
/// explicit different namespace is rejected, since a parent only manages its
/// own namespace.
pub(crate) fn make_desired_child_map<'v>(
    parent: &DynamicObject,
    parent_namespaced: bool,
    children: impl Iterator<Item = &'v Value>,
) -> Result<DesiredSet> {
    let mut map = ChildMap::new();
    let mut order = Vec::new();

    for value in children {
        let mut obj: DynamicObject =
            serde_json::from_value(value.clone()).map_err(|err| SyncError::InvalidChild {
                object: value
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>")
                    .to_string(),
                message: err.to_string(),
            })?;
        let Some(types) = obj.types.clone() else {
            return Err(SyncError::InvalidChild {
                object: display_name(&obj),
                message: "desired child has no apiVersion/kind".to_string(),
            });
        };
        let Some(name) = obj.metadata.name.clone() else {
            return Err(SyncError::InvalidChild {
                object: format!("<unnamed {}>", types.kind),
                message: "desired child has no name".to_string(),
            });
        };

        if parent_namespaced {
            match obj.metadata.namespace.as_deref() {
                None | Some("") => {
                    obj.metadata.namespace = parent.metadata.namespace.clone();
                }
                Some(ns) if Some(ns) != parent.metadata.namespace.as_deref() => {
                    return Err(SyncError::InvalidChild {
                        object: format!("{ns}/{name}"),
                        message: format!(
                            "desired child namespace {:?} doesn't match parent namespace {:?}",
                            ns,
                            parent.metadata.namespace.as_deref().unwrap_or_default()
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        let (api_group, _) = parse_api_version(&types.api_version);
        order.push(ChildRef {
            api_group: api_group.to_string(),
            kind: types.kind.clone(),
            name: crate::object::relative_name(parent, &obj),
        });
        map.insert(parent, obj)?;
    }

    Ok(DesiredSet { map, order })
}

/// What a completed sync pass asks of the caller.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Re-sync this parent after the given interval, if requested by the
    /// decision function.
    pub resync_after: Option<Duration>,
}

/// The sync pass for one composite controller definition
pub struct CompositeSyncer {
    driver: Arc<dyn ClusterDriver>,
    hook: Arc<dyn DecisionHook>,
    related: Arc<dyn RelatedObjects>,
    rollout: Box<dyn RolloutPolicy>,
    controller: CompositeController,
    /// The definition serialized once, shipped with every hook request.
    controller_value: Value,
    parent_key: ResourceKey,
    child_keys: HashMap<GroupVersionKind, ResourceKey>,
    strategies: UpdateStrategyMap,
    finalizer: FinalizerManager,
}

impl std::fmt::Debug for CompositeSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeSyncer")
            .field("controller", &self.controller)
            .field("parent_key", &self.parent_key)
            .field("child_keys", &self.child_keys)
            .finish_non_exhaustive()
    }
}

impl CompositeSyncer {
    /// Wire up a syncer for one controller definition. `child_keys` must
    /// cover every resource named under the definition's `childResources`.
    pub fn new(
        driver: Arc<dyn ClusterDriver>,
        hook: Arc<dyn DecisionHook>,
        controller: CompositeController,
        parent_key: ResourceKey,
        child_keys: Vec<ResourceKey>,
    ) -> Result<Self> {
        let mut keyed = HashMap::new();
        let mut strategies = UpdateStrategyMap::new();
        for rule in &controller.spec.child_resources {
            let key = child_keys
                .iter()
                .find(|key| {
                    key.api_version() == rule.rule.api_version && key.plural == rule.rule.resource
                })
                .ok_or_else(|| SyncError::UnknownResource {
                    api_version: rule.rule.api_version.clone(),
                    resource: rule.rule.resource.clone(),
                })?;
            if let Some(strategy) = &rule.update_strategy {
                strategies.insert(&key.group, &key.kind, strategy.clone());
            }
            keyed.insert(key.gvk(), key.clone());
        }

        let finalizer = FinalizerManager::for_controller(controller.name(), hook.has_finalize());
        let controller_value = serde_json::to_value(&controller)?;
        Ok(Self {
            driver,
            hook,
            related: Arc::new(NoRelatedObjects),
            rollout: Box::new(DefaultRolloutPolicy),
            controller,
            controller_value,
            parent_key,
            child_keys: keyed,
            strategies,
            finalizer,
        })
    }

    pub fn with_related(mut self, related: Arc<dyn RelatedObjects>) -> Self {
        self.related = related;
        self
    }

    pub fn with_rollout_policy(mut self, rollout: Box<dyn RolloutPolicy>) -> Self {
        self.rollout = rollout;
        self
    }

    pub fn parent_key(&self) -> &ResourceKey {
        &self.parent_key
    }

    pub fn child_keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.child_keys.values()
    }

    /// The definition's periodic resync interval, if configured.
    pub fn resync_period(&self) -> Option<Duration> {
        self.controller.resync_period()
    }

    /// Run one full sync pass for one parent object.
    pub async fn sync(&self, parent: &DynamicObject) -> Result<SyncOutcome> {
        let parent = self
            .finalizer
            .sync(self.driver.as_ref(), &self.parent_key, parent)
            .await?;
        let selector = self.make_selector(&parent)?;
        let observed = self.claim_children(&parent, &selector).await?;

        let engine = RevisionEngine {
            driver: self.driver.as_ref(),
            hook: self.hook.as_ref(),
            related: self.related.as_ref(),
            rollout: self.rollout.as_ref(),
            controller: &self.controller_value,
            parent_key: &self.parent_key,
            field_paths: self.controller.spec.parent_resource.revision_field_paths(),
            strategies: &self.strategies,
            finalizer: &self.finalizer,
            generates_selector: self.controller.generates_selector(),
        };
        let outcome = engine.sync(&parent, &observed, &selector).await?;

        let parent = if outcome.finalized {
            self.finalizer
                .remove(self.driver.as_ref(), &self.parent_key, &parent)
                .await?
        } else {
            parent
        };

        // Children are managed while the parent is alive, and during
        // finalization while cleanup is still our responsibility. The result
        // is held so the status write below happens either way.
        let mut desired = outcome.desired_children;
        let manage_result =
            if !is_pending_deletion(&parent) || self.finalizer.should_finalize(&parent) {
                match self.enforce_selector(&parent, &selector, &mut desired) {
                    Ok(()) => {
                        let reconciler = ChildReconciler::new(
                            self.driver.as_ref(),
                            &self.child_keys,
                            &self.strategies,
                        );
                        reconciler.reconcile(&parent, &observed, &desired).await
                    }
                    Err(err) => Err(err),
                }
            } else {
                Ok(())
            };

        self.update_parent_status(&parent, outcome.status).await?;
        manage_result?;

        let resync_after = (outcome.resync_after_seconds > 0.0)
            .then(|| Duration::from_secs_f64(outcome.resync_after_seconds));
        Ok(SyncOutcome { resync_after })
    }

    /// The selector children are claimed through: a generated controller-uid
    /// equality, or the parent's own `.spec.selector`.
    fn make_selector(&self, parent: &DynamicObject) -> Result<Selector> {
        if self.controller.generates_selector() {
            return Ok(Selector::equality(LABEL_CONTROLLER_UID, uid_of(parent)));
        }
        let tree = to_value(parent)?;
        let label_selector: LabelSelector = match get_nested(&tree, &["spec", "selector"]) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => LabelSelector::default(),
        };
        let selector = Selector::from_label_selector(&label_selector)?;
        if selector.selects_all() {
            // An empty selector would claim everything in the namespace.
            return Err(SyncError::InvalidConfig(format!(
                "{} {}: .spec.selector must have either matchLabels, matchExpressions, or both",
                self.parent_key.kind,
                display_name(parent)
            )));
        }
        Ok(selector)
    }

    /// List and claim every watched child kind. Kinds with nothing claimed
    /// still get an empty group, so the decision function can tell "none
    /// exist" apart from "kind not watched".
    async fn claim_children(
        &self,
        parent: &DynamicObject,
        selector: &Selector,
    ) -> Result<ChildMap> {
        let mut observed = ChildMap::new();
        let mut manager =
            ClaimManager::new(self.driver.as_ref(), &self.parent_key, parent, selector);

        for (gvk, key) in &self.child_keys {
            let namespace = if key.namespaced {
                parent.metadata.namespace.as_deref()
            } else {
                None
            };
            let candidates = self.driver.list(key, namespace).await?;
            let claimed = manager.claim_children(key, &candidates).await?;

            observed.init_group(gvk.clone());
            for obj in claimed {
                observed.insert(parent, obj)?;
            }
        }
        Ok(observed)
    }

    /// Every desired child must match the claim selector, or the next pass
    /// would orphan what this pass creates. With a generated selector the
    /// controller-uid label is injected rather than demanded.
    fn enforce_selector(
        &self,
        parent: &DynamicObject,
        selector: &Selector,
        desired: &mut ChildMap,
    ) -> Result<()> {
        let generates = self.controller.generates_selector();
        for obj in desired.objects_mut() {
            if generates {
                let labels = obj.metadata.labels.get_or_insert_with(Default::default);
                labels
                    .entry(LABEL_CONTROLLER_UID.to_string())
                    .or_insert_with(|| uid_of(parent).to_string());
            }
            let labels = crate::object::labels_of(obj);
            if !selector.matches(&labels) {
                return Err(SyncError::InvalidChild {
                    object: display_name(obj),
                    message: "desired child labels don't match the parent selector".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Write the decision function's desired `.status` through the status
    /// subresource, with `observedGeneration` stamped in. A parent deleted
    /// or modified mid-write is left for the next pass.
    async fn update_parent_status(
        &self,
        parent: &DynamicObject,
        status: Option<Value>,
    ) -> Result<()> {
        let mut status = status.unwrap_or_else(|| json!({}));
        if let Some(map) = status.as_object_mut() {
            map.insert(
                "observedGeneration".to_string(),
                json!(parent.metadata.generation.unwrap_or(0)),
            );
        }

        let result = update_status_with_retries(
            self.driver.as_ref(),
            &self.parent_key,
            parent,
            move |obj| {
                if obj.data.get("status") == Some(&status) {
                    return false;
                }
                obj.data["status"] = status.clone();
                true
            },
        )
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_object_gone() || err.is_conflict() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
