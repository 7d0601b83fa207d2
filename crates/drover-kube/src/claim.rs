//! Ownership claiming for children and revision objects
//!
//! Every reconciliation pass rebuilds its view of which objects belong to
//! the parent by running each candidate through the claim decision:
//! - already ours and still matching the selector: keep it
//! - ours but no longer matching: release the owner reference
//! - owned by another controller: leave it alone, ownership is never stolen
//! - orphan matching the selector: adopt it, after re-checking that the
//!   parent still exists and is not being deleted
//!
//! Adopt and release rewrite only `metadata.ownerReferences`, with
//! conflict-retrying updates so concurrent writers cannot clobber each
//! other's changes.

use kube::core::DynamicObject;

use crate::cluster::{update_with_retries, ClusterDriver, ResourceKey};
use crate::error::{Result, SyncError};
use crate::object::{
    controller_ref, display_name, is_pending_deletion, labels_of, make_controller_ref, name_of,
    remove_owner_reference, uid_of, upsert_owner_reference,
};
use crate::selector::Selector;

/// Claim decision engine for one parent within one reconciliation pass
pub struct ClaimManager<'a, D: ClusterDriver + ?Sized> {
    driver: &'a D,
    parent_key: &'a ResourceKey,
    parent: &'a DynamicObject,
    selector: &'a Selector,
    /// Outcome of the pre-adoption parent re-check, cached for the pass
    can_adopt: Option<std::result::Result<(), String>>,
}

impl<'a, D: ClusterDriver + ?Sized> ClaimManager<'a, D> {
    pub fn new(
        driver: &'a D,
        parent_key: &'a ResourceKey,
        parent: &'a DynamicObject,
        selector: &'a Selector,
    ) -> Self {
        Self {
            driver,
            parent_key,
            parent,
            selector,
            can_adopt: None,
        }
    }

    /// Run the claim decision over every candidate of one kind, returning
    /// the objects that belong to this parent. Individual claim failures
    /// are collected; any failure fails the whole pass so a half-claimed
    /// view is never acted upon.
    pub async fn claim_children(
        &mut self,
        child_key: &ResourceKey,
        candidates: &[DynamicObject],
    ) -> Result<Vec<DynamicObject>> {
        let mut claimed = Vec::new();
        let mut errors = Vec::new();

        for candidate in candidates {
            match self.claim(child_key, candidate).await {
                Ok(true) => claimed.push(candidate.clone()),
                Ok(false) => {}
                Err(err) => errors.push(err),
            }
        }

        SyncError::aggregate(errors)?;
        Ok(claimed)
    }

    /// Decide one candidate. True means the object is ours after this call.
    async fn claim(&mut self, child_key: &ResourceKey, candidate: &DynamicObject) -> Result<bool> {
        let matched = self.selector.matches(&labels_of(candidate));

        let Some(owner) = controller_ref(candidate) else {
            // Orphan. Only adopt a live candidate that matches the selector,
            // for a parent that is not going away.
            if !matched || is_pending_deletion(self.parent) || is_pending_deletion(candidate) {
                return Ok(false);
            }
            return match self.adopt(child_key, candidate).await {
                Ok(()) => Ok(true),
                // The candidate vanished between listing and adoption.
                Err(err) if err.is_object_gone() => Ok(false),
                Err(err) => Err(err),
            };
        };

        if owner.uid != uid_of(self.parent) {
            // Owned by someone else.
            return Ok(false);
        }
        if matched {
            return Ok(true);
        }
        // Ours, but the selector no longer matches. Release it, unless the
        // parent itself is being deleted anyway.
        if is_pending_deletion(self.parent) {
            return Ok(false);
        }
        self.release(child_key, candidate).await?;
        Ok(false)
    }

    async fn adopt(&mut self, child_key: &ResourceKey, candidate: &DynamicObject) -> Result<()> {
        if let Err(reason) = self.recheck_parent().await {
            return Err(SyncError::AdoptionRefused {
                kind: child_key.kind.clone(),
                object: display_name(candidate),
                reason,
            });
        }

        tracing::debug!(
            "{} {}: adopting {} {}",
            self.parent_key.kind,
            display_name(self.parent),
            child_key.kind,
            display_name(candidate)
        );

        let new_ref = make_controller_ref(self.parent)?;
        update_with_retries(self.driver, child_key, candidate, |obj| {
            let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
            upsert_owner_reference(refs, &new_ref)
        })
        .await?;
        Ok(())
    }

    async fn release(&self, child_key: &ResourceKey, candidate: &DynamicObject) -> Result<()> {
        tracing::debug!(
            "{} {}: releasing {} {}",
            self.parent_key.kind,
            display_name(self.parent),
            child_key.kind,
            display_name(candidate)
        );

        let parent_uid = uid_of(self.parent).to_string();
        let outcome = update_with_retries(self.driver, child_key, candidate, |obj| {
            match &mut obj.metadata.owner_references {
                Some(refs) => remove_owner_reference(refs, &parent_uid),
                None => false,
            }
        })
        .await;

        match outcome {
            Ok(_) => Ok(()),
            // Already gone or replaced; either way it is no longer ours.
            Err(err) if err.is_object_gone() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Uncached read confirming the parent still exists under the same uid
    /// and is not pending deletion. Closes the race where the parent was
    /// deleted after the candidate list was taken; adopting for a gone
    /// parent would strand the orphan with a dangling owner reference.
    async fn recheck_parent(&mut self) -> std::result::Result<(), String> {
        if self.can_adopt.is_none() {
            self.can_adopt = Some(self.fresh_parent_check().await);
        }
        self.can_adopt.clone().unwrap_or(Ok(()))
    }

    async fn fresh_parent_check(&self) -> std::result::Result<(), String> {
        let fresh = self
            .driver
            .get(
                self.parent_key,
                self.parent.metadata.namespace.as_deref(),
                name_of(self.parent),
            )
            .await
            .map_err(|err| err.to_string())?;

        let Some(fresh) = fresh else {
            return Err(format!(
                "original {} {} no longer exists",
                self.parent_key.kind,
                display_name(self.parent)
            ));
        };
        if uid_of(&fresh) != uid_of(self.parent) {
            return Err(format!(
                "original {} {} is gone: got uid {}, want uid {}",
                self.parent_key.kind,
                display_name(self.parent),
                uid_of(&fresh),
                uid_of(self.parent)
            ));
        }
        if is_pending_deletion(&fresh) {
            return Err(format!(
                "{} {} has just been deleted",
                self.parent_key.kind,
                display_name(self.parent)
            ));
        }
        Ok(())
    }
}
