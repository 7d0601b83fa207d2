//! Gradual migration of children between parent revisions
//!
//! The rollout policy decides, once per sync pass, how child claims move
//! from historical revisions toward the latest one. It only edits claim
//! lists and the latest revision's status; actually rewriting children is
//! the child reconciler's job, driven by whichever revision's template a
//! claim points at.

use std::collections::HashMap;

use serde_json::json;

use drover_core::object::{
    StatusCondition, get_status_condition, observed_generation, set_condition,
};

use crate::api::{ChildUpdateMethod, StatusChecks, UpdateStrategyMap, group_kind_key};
use crate::children::apply_update;
use crate::error::Result;
use crate::object::{ChildMap, objects_equal, to_value};
use crate::revisions::RevisionChildren;

use super::revisions::ParentRevision;

/// Decides how child claims migrate toward the latest revision.
///
/// `revisions[0]` is always the latest; the policy may rewrite any
/// revision's claim list and the latest revision's response status.
pub trait RolloutPolicy: Send + Sync {
    fn progress(
        &self,
        revisions: &mut [ParentRevision],
        observed: &ChildMap,
        strategies: &UpdateStrategyMap,
    ) -> Result<()>;
}

/// The standard policy: free adoption of unclaimed and already-matching
/// children, then at most one real move per pass, gated on every child
/// already on the latest revision being caught up and healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRolloutPolicy;

/// Child name -> claiming revision index, per version-agnostic kind key.
type ClaimIndex = HashMap<String, HashMap<String, usize>>;

impl RolloutPolicy for DefaultRolloutPolicy {
    fn progress(
        &self,
        revisions: &mut [ParentRevision],
        observed: &ChildMap,
        strategies: &UpdateStrategyMap,
    ) -> Result<()> {
        let mut claimed = sync_revision_claims(revisions, strategies);

        // These are cloned so claim edits below don't fight the borrow of
        // the latest revision's desired set.
        let latest_desired = revisions[0].desired_children.clone();
        let latest_order = revisions[0].desired_order.clone();

        // Unclaimed children go straight to the latest revision. Children
        // claimed elsewhere that already match the latest template move too:
        // the move is a no-op update, and doing it now keeps an otherwise
        // idle pass from stalling the rollout.
        for (gvk, group) in latest_desired.groups() {
            if !strategies.is_rolling(&gvk.group, &gvk.kind) {
                continue;
            }
            let key = group_kind_key(&gvk.group, &gvk.kind);
            for (name, desired_child) in group {
                let owner = claimed.get(&key).and_then(|names| names.get(name)).copied();
                match owner {
                    None => {
                        revisions[0].revision.add_child(&gvk.group, &gvk.kind, name);
                        claimed.entry(key.clone()).or_default().insert(name.clone(), 0);
                    }
                    Some(0) => {}
                    Some(idx) => {
                        let Some(child) =
                            observed.find_group_kind_name(&gvk.group, &gvk.kind, name)
                        else {
                            // Not observed, so we can't prove the move is a
                            // no-op.
                            continue;
                        };
                        let Ok(updated) = apply_update(child, desired_child) else {
                            continue;
                        };
                        if objects_equal(child, &updated)? {
                            revisions[0].revision.add_child(&gvk.group, &gvk.kind, name);
                            revisions[idx].revision.remove_child(&gvk.group, &gvk.kind, name);
                            claimed
                                .entry(key.clone())
                                .or_default()
                                .insert(name.clone(), 0);
                        }
                    }
                }
            }
        }

        // One real move per pass, in the order the decision function listed
        // the latest revision's children.
        for child_ref in &latest_order {
            if !strategies.is_rolling(&child_ref.api_group, &child_ref.kind) {
                continue;
            }
            let key = group_kind_key(&child_ref.api_group, &child_ref.kind);
            let owner = claimed
                .get(&key)
                .and_then(|names| names.get(&child_ref.name))
                .copied();
            if owner == Some(0) {
                continue;
            }

            if let Err(reason) = ready_for_next_move(&revisions[0], observed, strategies) {
                set_updated_condition(&mut revisions[0], "False", "RolloutWaiting", &reason);
                return Ok(());
            }

            revisions[0]
                .revision
                .add_child(&child_ref.api_group, &child_ref.kind, &child_ref.name);
            for pr in &mut revisions[1..] {
                pr.revision
                    .remove_child(&child_ref.api_group, &child_ref.kind, &child_ref.name);
            }
            set_updated_condition(
                &mut revisions[0],
                "False",
                "RolloutProgressing",
                &format!("updating {} {}", child_ref.kind, child_ref.name),
            );
            return Ok(());
        }

        let message = format!("latest ControllerRevision: {}", revisions[0].revision.name());
        set_updated_condition(&mut revisions[0], "True", "OnLatestRevision", &message);
        Ok(())
    }
}

/// Drops stale claims and builds the claim index. A claim is stale when its
/// kind no longer rolls gradually, when the latest revision no longer
/// desires the name at all (the child is about to be deleted), or when an
/// earlier revision in the list already claims the name; the latest revision
/// sits first, so it wins every tie.
fn sync_revision_claims(
    revisions: &mut [ParentRevision],
    strategies: &UpdateStrategyMap,
) -> ClaimIndex {
    let latest_desired = revisions[0].desired_children.clone();
    let mut claimed = ClaimIndex::new();

    for (idx, pr) in revisions.iter_mut().enumerate() {
        let mut kept = Vec::with_capacity(pr.revision.children.len());
        for ck in std::mem::take(&mut pr.revision.children) {
            if !strategies.is_rolling(&ck.api_group, &ck.kind) {
                continue;
            }
            let key = group_kind_key(&ck.api_group, &ck.kind);
            let mut names = Vec::with_capacity(ck.names.len());
            for name in ck.names {
                if latest_desired
                    .find_group_kind_name(&ck.api_group, &ck.kind, &name)
                    .is_none()
                {
                    continue;
                }
                let claim_map = claimed.entry(key.clone()).or_default();
                if claim_map.contains_key(&name) {
                    continue;
                }
                claim_map.insert(name.clone(), idx);
                names.push(name);
            }
            if names.is_empty() {
                continue;
            }
            kept.push(RevisionChildren {
                api_group: ck.api_group,
                kind: ck.kind,
                names,
            });
        }
        pr.revision.children = kept;
    }
    claimed
}

/// Every rolling child already claimed by the latest revision must be
/// observed, carry no pending diff, and pass its kind's status checks before
/// another child is pulled in. Returns the first reason to wait.
fn ready_for_next_move(
    latest: &ParentRevision,
    observed: &ChildMap,
    strategies: &UpdateStrategyMap,
) -> std::result::Result<(), String> {
    for ck in &latest.revision.children {
        let Some(strategy) = strategies.get(&ck.api_group, &ck.kind) else {
            continue;
        };
        if !strategy.method.is_rolling() {
            continue;
        }
        for name in &ck.names {
            let Some(child) = observed.find_group_kind_name(&ck.api_group, &ck.kind, name)
            else {
                return Err(format!("missing child {} {}", ck.kind, name));
            };
            let Some(update) =
                latest.desired_children.find_group_kind_name(&ck.api_group, &ck.kind, name)
            else {
                continue;
            };
            let updated = apply_update(child, update).map_err(|err| {
                format!("can't check if child {} {} is updated: {}", ck.kind, name, err)
            })?;
            if !objects_equal(child, &updated).map_err(|err| err.to_string())? {
                return Err(format!("child {} {} is not updated yet", ck.kind, name));
            }

            let tree = to_value(child).map_err(|err| err.to_string())?;
            if strategy.method == ChildUpdateMethod::RollingInPlace {
                // Not every controller maintains observedGeneration; when it
                // does, status must reflect the latest spec before it counts.
                let generation = observed_generation(&tree);
                if generation > 0 && generation < child.metadata.generation.unwrap_or(0) {
                    return Err(format!(
                        "child {} {} with RollingInPlace update strategy hasn't observed latest spec",
                        ck.kind, name
                    ));
                }
            }
            if let Err(reason) = child_status_check(&strategy.status_checks, &tree) {
                return Err(format!(
                    "child {} {} failed status check: {}",
                    ck.kind, name, reason
                ));
            }
        }
    }
    Ok(())
}

fn child_status_check(
    checks: &StatusChecks,
    child: &serde_json::Value,
) -> std::result::Result<(), String> {
    for check in &checks.conditions {
        let Some(condition) = get_status_condition(child, &check.condition_type) else {
            return Err(format!(
                "required condition type missing: {:?}",
                check.condition_type
            ));
        };
        if let Some(status) = &check.status {
            if condition.status != *status {
                return Err(format!(
                    "{:?} condition status is {:?} (want {:?})",
                    check.condition_type, condition.status, status
                ));
            }
        }
        if let Some(reason) = &check.reason {
            if condition.reason != *reason {
                return Err(format!(
                    "{:?} condition reason is {:?} (want {:?})",
                    check.condition_type, condition.reason, reason
                ));
            }
        }
    }
    Ok(())
}

fn set_updated_condition(latest: &mut ParentRevision, status: &str, reason: &str, message: &str) {
    let target = latest.response.status.get_or_insert_with(|| json!({}));
    set_condition(
        target,
        &StatusCondition::new("Updated", status, reason, message),
    );
}
