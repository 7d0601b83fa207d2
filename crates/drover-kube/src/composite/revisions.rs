//! Revision-tracked sync: one decision call per tracked parent shape
//!
//! When any child kind rolls out gradually, a parent's template change must
//! not rewrite every child at once. Instead each distinct parent shape is
//! persisted as a ControllerRevision, the decision function is asked for
//! desired state once per shape, and children migrate between shapes one
//! rollout step at a time. This module owns that whole pass:
//! claim -> materialize -> fan out -> progress -> prune -> persist ->
//! aggregate.

use std::collections::BTreeMap;
use std::collections::HashMap;

use futures::future::join_all;
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use drover_core::object::{extract_field_paths, get_nested, overlay_field_paths};
use drover_hooks::{DecisionHook, ObjectMap, SyncRequest, SyncResponse};

use crate::api::UpdateStrategyMap;
use crate::claim::ClaimManager;
use crate::cluster::{ClusterDriver, ResourceKey};
use crate::error::{Result, SyncError};
use crate::finalizer::FinalizerManager;
use crate::object::{ChildMap, display_name, from_value, is_pending_deletion, to_value, uid_of};
use crate::revisions::{ControllerRevision, make_revision, revision_resource_key};
use crate::selector::Selector;

use super::rollout::RolloutPolicy;
use super::{DesiredSet, RelatedObjects, make_desired_child_map};

/// A version-agnostic reference to one desired child, in the order the
/// decision function returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub api_group: String,
    pub kind: String,
    /// Name relative to the parent, as used in claim lists.
    pub name: String,
}

/// One materialized parent shape within a single sync pass.
///
/// Position 0 in any revision list is always the latest shape (the live
/// parent); the rest are historical shapes still claiming children.
#[derive(Debug, Clone)]
pub struct ParentRevision {
    /// The parent with this revision's patch overlaid.
    pub parent: DynamicObject,
    /// The persisted record backing this shape.
    pub revision: ControllerRevision,
    /// This shape's decision-function answer.
    pub response: SyncResponse,
    /// The answer's children, keyed like observed children.
    pub desired_children: ChildMap,
    /// The answer's children in response order, for rollout pacing.
    pub desired_order: Vec<ChildRef>,
}

/// The aggregated answer of a revision-tracked sync pass.
#[derive(Debug, Clone, Default)]
pub struct RevisionOutcome {
    pub status: Option<Value>,
    pub desired_children: ChildMap,
    /// Smallest strictly-positive request across revisions; 0 means none.
    pub resync_after_seconds: f64,
    /// True only when every revision reported finalized.
    pub finalized: bool,
}

/// Overlay a revision's stored patch onto a fresh copy of the live parent.
pub fn materialize_parent(
    parent: &DynamicObject,
    patch: &Value,
    field_paths: &[String],
) -> Result<DynamicObject> {
    let mut tree = to_value(parent)?;
    overlay_field_paths(&mut tree, patch, field_paths)
        .map_err(|e| SyncError::Apply(e.to_string()))?;
    from_value(tree)
}

/// Runs the revision-tracked sync for one parent
pub(crate) struct RevisionEngine<'a> {
    pub(crate) driver: &'a dyn ClusterDriver,
    pub(crate) hook: &'a dyn DecisionHook,
    pub(crate) related: &'a dyn RelatedObjects,
    pub(crate) rollout: &'a dyn RolloutPolicy,
    /// The controller definition, serialized for hook requests.
    pub(crate) controller: &'a Value,
    pub(crate) parent_key: &'a ResourceKey,
    pub(crate) field_paths: Vec<String>,
    pub(crate) strategies: &'a UpdateStrategyMap,
    pub(crate) finalizer: &'a FinalizerManager,
    pub(crate) generates_selector: bool,
}

impl RevisionEngine<'_> {
    /// One full pass. `selector` is the parent's child selector; revision
    /// claiming narrows it further with the parent-type labels.
    pub(crate) async fn sync(
        &self,
        parent: &DynamicObject,
        observed: &ChildMap,
        selector: &Selector,
    ) -> Result<RevisionOutcome> {
        let finalizing = is_pending_deletion(parent) && self.finalizer.should_finalize(parent);

        // Fast path: no rolling strategies means there is only ever one
        // shape. A parent dying without our finalizer gets one last sync for
        // status only, so revision bookkeeping would be wasted work.
        if !self.strategies.any_rolling()
            || (is_pending_deletion(parent) && !self.finalizer.should_finalize(parent))
        {
            let children_wire = observed.to_object_map()?;
            let response = self.call_hook(parent, &children_wire, finalizing).await?;
            let desired = make_desired_child_map(
                parent,
                self.parent_key.namespaced,
                response.present_children(),
            )?;
            return Ok(RevisionOutcome {
                status: response.status,
                desired_children: desired.map,
                resync_after_seconds: response.resync_after_seconds,
                finalized: response.finalized,
            });
        }

        // Claim the persisted revisions and split them into "matches the
        // live parent" versus "historical shape to materialize".
        let observed_revisions = self.claim_revisions(parent, selector).await?;
        let parent_value = to_value(parent)?;
        let latest_patch = extract_field_paths(&parent_value, &self.field_paths)
            .map_err(|e| SyncError::Apply(e.to_string()))?;

        let mut latest_revision = None;
        let mut historical = Vec::new();
        for revision in &observed_revisions {
            if revision.parent_patch == latest_patch {
                latest_revision = Some(revision.clone());
                continue;
            }
            let materialized = materialize_parent(parent, &revision.parent_patch, &self.field_paths)?;
            historical.push((materialized, revision.clone()));
        }
        let latest_revision = match latest_revision {
            Some(revision) => revision,
            None => self.new_latest_revision(parent, latest_patch)?,
        };

        // The latest shape is always position 0.
        let mut pairs = vec![(parent.clone(), latest_revision)];
        pairs.extend(historical);

        // Fan out one decision call per shape, joined in input order. Any
        // failure aborts the pass; partial rollout decisions are never used.
        let children_wire = observed.to_object_map()?;
        let responses = join_all(pairs.iter().map(|(shape, _)| {
            let children_wire = children_wire.clone();
            async move { self.call_hook(shape, &children_wire, finalizing).await }
        }))
        .await;

        let mut revisions = Vec::with_capacity(pairs.len());
        for ((shape, revision), response) in pairs.into_iter().zip(responses) {
            let response = response?;
            let DesiredSet { map, order } = make_desired_child_map(
                &shape,
                self.parent_key.namespaced,
                response.present_children(),
            )?;
            revisions.push(ParentRevision {
                parent: shape,
                revision,
                response,
                desired_children: map,
                desired_order: order,
            });
        }

        // Advance any ongoing rollout by moving claims between revisions.
        self.rollout.progress(&mut revisions, observed, self.strategies)?;

        // Prune historical shapes that claim nothing anymore. The latest is
        // always kept, children or not. We don't remember shapes we finished
        // migrating away from; rollback means re-submitting the old config.
        let latest = revisions.remove(0);
        let mut survivors = vec![latest];
        survivors.extend(
            revisions
                .into_iter()
                .filter(|pr| pr.revision.count_children() > 0),
        );

        // Persist revision bookkeeping before any child is touched, so our
        // durable record of intent always commits first.
        let desired_revisions: Vec<&ControllerRevision> =
            survivors.iter().map(|pr| &pr.revision).collect();
        self.manage_revisions(parent, &observed_revisions, &desired_revisions)
            .await?;

        // Aggregate the child map: the latest shape's answer is the base,
        // overwritten wherever a historical shape still claims a name. A
        // child claimed by an old shape keeps its old template until the
        // rollout reassigns it.
        let mut desired_children = survivors[0].desired_children.clone();
        for pr in &survivors[1..] {
            for ck in &pr.revision.children {
                for name in &ck.names {
                    if let Some(child) =
                        pr.desired_children.find_group_kind_name(&ck.api_group, &ck.kind, name)
                    {
                        desired_children.replace_if_exists(parent, child.clone())?;
                    }
                }
            }
        }

        let mut resync_after_seconds = 0.0;
        for pr in &survivors {
            let resync = pr.response.resync_after_seconds;
            if resync > 0.0 && (resync_after_seconds == 0.0 || resync < resync_after_seconds) {
                resync_after_seconds = resync;
            }
        }
        let finalized = survivors.iter().all(|pr| pr.response.finalized);

        Ok(RevisionOutcome {
            status: survivors[0].response.status.clone(),
            desired_children,
            resync_after_seconds,
            finalized,
        })
    }

    async fn call_hook(
        &self,
        parent: &DynamicObject,
        children: &ObjectMap,
        finalizing: bool,
    ) -> Result<SyncResponse> {
        let related = self.related.for_parent(parent).await;
        let request = SyncRequest {
            controller: self.controller.clone(),
            parent: to_value(parent)?,
            children: children.clone(),
            related,
            finalizing,
        };
        self.hook
            .call(&request)
            .await
            .map_err(|e| SyncError::Hook(e.to_string()))
    }

    /// Claim persisted revisions for this parent, narrowed by the
    /// parent-type labels so revisions never cross-match between unrelated
    /// parent resources.
    async fn claim_revisions(
        &self,
        parent: &DynamicObject,
        selector: &Selector,
    ) -> Result<Vec<ControllerRevision>> {
        let revision_key = revision_resource_key();
        let mut selector = selector.clone();
        selector.require_equality(crate::api::LABEL_API_GROUP, &self.parent_key.group);
        selector.require_equality(crate::api::LABEL_RESOURCE, &self.parent_key.plural);

        let all = self
            .driver
            .list(&revision_key, parent.metadata.namespace.as_deref())
            .await?;
        let mut manager = ClaimManager::new(self.driver, self.parent_key, parent, &selector);
        let claimed = manager.claim_children(&revision_key, &all).await?;
        claimed.iter().map(ControllerRevision::from_object).collect()
    }

    /// Synthesize the persisted record for a parent shape never seen before.
    fn new_latest_revision(
        &self,
        parent: &DynamicObject,
        patch: Value,
    ) -> Result<ControllerRevision> {
        let labels: BTreeMap<String, String> = if self.generates_selector {
            [(
                crate::api::LABEL_CONTROLLER_UID.to_string(),
                uid_of(parent).to_string(),
            )]
            .into()
        } else {
            // Without a generated selector, revisions need the template's
            // labels so orphaned ones can be found through the selector.
            get_nested(&to_value(parent)?, &["spec", "template", "metadata", "labels"])
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default()
        };
        debug!(
            "{} {}: creating revision record for new parent shape",
            self.parent_key.kind,
            display_name(parent)
        );
        make_revision(parent, self.parent_key, patch, labels)
    }

    /// Reconcile persisted revision objects against the surviving desired
    /// set: delete unclaimed-and-undesired, update changed, create new.
    async fn manage_revisions(
        &self,
        parent: &DynamicObject,
        observed: &[ControllerRevision],
        desired: &[&ControllerRevision],
    ) -> Result<()> {
        let revision_key = revision_resource_key();
        let namespace = parent.metadata.namespace.as_deref();

        let observed_map: HashMap<&str, &ControllerRevision> =
            observed.iter().map(|r| (r.name(), r)).collect();
        let desired_map: HashMap<&str, &&ControllerRevision> =
            desired.iter().map(|r| (r.name(), r)).collect();

        for revision in observed {
            if desired_map.contains_key(revision.name()) {
                continue;
            }
            info!(
                "{} {}: deleting revision {}",
                self.parent_key.kind,
                display_name(parent),
                revision.name()
            );
            self.driver
                .delete(&revision_key, namespace, revision.name(), Some(revision.uid()))
                .await?;
        }

        for revision in desired {
            match observed_map.get(revision.name()) {
                Some(old) => {
                    // Carry the stored ResourceVersion forward so the write
                    // is a clean replace of what we last saw.
                    let mut updated = (*revision).clone();
                    updated.metadata.resource_version = old.metadata.resource_version.clone();
                    if serde_json::to_value(&updated)? == serde_json::to_value(old)? {
                        continue;
                    }
                    info!(
                        "{} {}: updating revision {}",
                        self.parent_key.kind,
                        display_name(parent),
                        revision.name()
                    );
                    self.driver
                        .update(&revision_key, namespace, &updated.to_object()?)
                        .await?;
                }
                None => {
                    info!(
                        "{} {}: creating revision {}",
                        self.parent_key.kind,
                        display_name(parent),
                        revision.name()
                    );
                    self.driver
                        .create(&revision_key, namespace, &revision.to_object()?)
                        .await?;
                }
            }
        }

        Ok(())
    }
}
