//! Finalizer bookkeeping for parent objects
//!
//! When a finalize hook is configured, the parent carries our finalizer so
//! the cluster cannot delete it before the hook has cleaned up. The manager
//! keeps that single list entry in sync and answers the one question the
//! engine asks: "is pre-deletion cleanup still our job?"

use kube::core::DynamicObject;
use tracing::debug;

use crate::api::API_GROUP;
use crate::cluster::{ClusterDriver, ResourceKey, update_with_retries};
use crate::error::Result;
use crate::object::{display_name, is_pending_deletion};

/// Cluster garbage-collection finalizers. A parent carrying one of these is
/// already having its children deleted or orphaned by the GC, so we must not
/// manage children alongside it.
const GC_FINALIZERS: [&str; 2] = ["foregroundDeletion", "orphan"];

/// Keeps one named finalizer present or absent on parent objects
#[derive(Debug, Clone)]
pub struct FinalizerManager {
    name: String,
    enabled: bool,
}

impl FinalizerManager {
    /// The manager for one composite controller. `enabled` tracks whether a
    /// finalize hook is configured at all.
    pub fn for_controller(controller_name: &str, enabled: bool) -> Self {
        Self {
            name: format!("{API_GROUP}/compositecontroller-{controller_name}"),
            enabled,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when children must still be managed even though the parent is
    /// pending deletion: our finalizer is present, finalization is enabled,
    /// and the GC has not taken over.
    pub fn should_finalize(&self, parent: &DynamicObject) -> bool {
        self.enabled && !has_gc_finalizer(parent) && has_finalizer(parent, &self.name)
    }

    /// Brings the parent's finalizer list in line: add ours when enabled,
    /// remove it when not. Adding is skipped once deletion is pending, since
    /// we may have already removed it on a previous pass.
    pub async fn sync<D: ClusterDriver + ?Sized>(
        &self,
        driver: &D,
        parent_key: &ResourceKey,
        parent: &DynamicObject,
    ) -> Result<DynamicObject> {
        if has_finalizer(parent, &self.name) == self.enabled {
            return Ok(parent.clone());
        }
        if self.enabled {
            if is_pending_deletion(parent) {
                return Ok(parent.clone());
            }
            debug!(
                "{} {}: adding finalizer {}",
                parent_key.kind,
                display_name(parent),
                self.name
            );
            let name = self.name.clone();
            update_with_retries(driver, parent_key, parent, move |obj| {
                let finalizers = obj.metadata.finalizers.get_or_insert_with(Vec::new);
                if finalizers.iter().any(|f| *f == name) {
                    return false;
                }
                finalizers.push(name.clone());
                true
            })
            .await
        } else {
            self.remove(driver, parent_key, parent).await
        }
    }

    /// Removes our finalizer, un-blocking the parent's actual deletion.
    pub async fn remove<D: ClusterDriver + ?Sized>(
        &self,
        driver: &D,
        parent_key: &ResourceKey,
        parent: &DynamicObject,
    ) -> Result<DynamicObject> {
        if !has_finalizer(parent, &self.name) {
            return Ok(parent.clone());
        }
        debug!(
            "{} {}: removing finalizer {}",
            parent_key.kind,
            display_name(parent),
            self.name
        );
        let name = self.name.clone();
        update_with_retries(driver, parent_key, parent, move |obj| {
            match &mut obj.metadata.finalizers {
                Some(finalizers) => {
                    let before = finalizers.len();
                    finalizers.retain(|f| *f != name);
                    finalizers.len() != before
                }
                None => false,
            }
        })
        .await
    }
}

pub fn has_finalizer(obj: &DynamicObject, name: &str) -> bool {
    obj.metadata
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == name))
}

fn has_gc_finalizer(obj: &DynamicObject) -> bool {
    obj.metadata
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| GC_FINALIZERS.contains(&f.as_str())))
}
