//! Child object reconciliation
//!
//! Turns one parent's (observed, desired) child sets into API calls:
//! - observed but no longer desired: delete, preconditioned on uid
//! - desired but not observed: create, owned by the parent
//! - both: three-way merge in the style of `kubectl apply`, then act
//!   according to the kind's update strategy
//!
//! Failures are collected per object and aggregated, so a stuck delete
//! never blocks the create that would restore service.

use std::collections::HashMap;

use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::{Map, Value};

use drover_core::apply::sanitize_last_applied;
use drover_core::object::{get_nested, remove_nested, set_nested};
use drover_core::{LAST_APPLIED_ANNOTATION, parse_last_applied, render_last_applied};

use crate::api::{ChildUpdateMethod, UpdateStrategyMap};
use crate::cluster::{ClusterDriver, ResourceKey};
use crate::error::{Result, SyncError};
use crate::object::{
    ChildMap, display_name, format_api_version, from_value, is_pending_deletion,
    make_controller_ref, name_of, objects_equal, to_value, uid_of,
};

/// Read-only, system-populated metadata fields. Reverted after the merge so
/// a hook echoing stale copies of them back can never produce a diff.
const OBJECT_META_SYSTEM_FIELDS: [&str; 7] = [
    "selfLink",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
];

/// Reads the recorded desired partial object from a child's annotation.
/// A child we never wrote to has no annotation, which reads as empty.
pub fn get_last_applied(obj: &DynamicObject) -> Result<Map<String, Value>> {
    let raw = obj
        .metadata
        .annotations
        .as_ref()
        .and_then(|ann| ann.get(LAST_APPLIED_ANNOTATION));
    match raw {
        Some(raw) => Ok(parse_last_applied(raw)?),
        None => Ok(Map::new()),
    }
}

/// Records the desired partial object in a child's annotation.
pub fn set_last_applied(obj: &mut DynamicObject, desired: &Map<String, Value>) -> Result<()> {
    let mut recorded = desired.clone();
    sanitize_last_applied(&mut recorded);
    let raw = render_last_applied(&recorded)?;
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_ANNOTATION.to_string(), raw);
    Ok(())
}

/// The full JSON tree of an object, metadata included.
fn object_tree(obj: &DynamicObject) -> Result<Map<String, Value>> {
    match to_value(obj)? {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Serialization(
            "object did not serialize to a JSON object".to_string(),
        )),
    }
}

/// Computes the full updated object for one child: the three-way merge of
/// (observed, last-applied, desired), with system metadata fields and the
/// whole `.status` subtree forced back to their observed values, and the
/// last-applied annotation refreshed to the new desired partial.
///
/// The result compares equal to `observed` exactly when there is nothing
/// for this controller to change.
pub fn apply_update(observed: &DynamicObject, desired: &DynamicObject) -> Result<DynamicObject> {
    let observed_tree = object_tree(observed)?;
    let desired_tree = object_tree(desired)?;
    let last_applied = get_last_applied(observed)?;

    let merged = drover_core::merge(&observed_tree, &last_applied, &desired_tree)?;
    let mut merged = Value::Object(merged);
    let observed_value = Value::Object(observed_tree);

    // The hook only owns what it asked for. Everything identity-like or
    // cluster-written is reverted to observed, otherwise a no-op pass would
    // keep finding phantom diffs and loop forever.
    for field in OBJECT_META_SYSTEM_FIELDS {
        revert_field(&mut merged, &observed_value, &["metadata", field])?;
    }
    revert_field(&mut merged, &observed_value, &["status"])?;

    let mut new_obj = from_value(merged)?;
    if let Err(err) = set_last_applied(&mut new_obj, &desired_tree) {
        tracing::error!(
            "failed to record last-applied configuration on {} {}: {}",
            kind_of_key(desired),
            display_name(desired),
            err
        );
    }
    Ok(new_obj)
}

fn kind_of_key(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object")
}

/// Forces one field of `merged` back to its observed value: set when the
/// observed object has it, removed when it does not.
fn revert_field(merged: &mut Value, observed: &Value, path: &[&str]) -> Result<()> {
    match get_nested(observed, path) {
        Some(value) => set_nested(merged, path, value.clone())?,
        None => remove_nested(merged, path),
    }
    Ok(())
}

/// Reconciles observed children against desired children for one parent
pub struct ChildReconciler<'a, D: ClusterDriver + ?Sized> {
    driver: &'a D,
    resources: &'a HashMap<GroupVersionKind, ResourceKey>,
    strategies: &'a UpdateStrategyMap,
}

impl<'a, D: ClusterDriver + ?Sized> ChildReconciler<'a, D> {
    pub fn new(
        driver: &'a D,
        resources: &'a HashMap<GroupVersionKind, ResourceKey>,
        strategies: &'a UpdateStrategyMap,
    ) -> Self {
        Self {
            driver,
            resources,
            strategies,
        }
    }

    /// Reconcile every child kind. Per-object failures are collected and
    /// aggregated; one kind's trouble does not block the others.
    pub async fn reconcile(
        &self,
        parent: &DynamicObject,
        observed: &ChildMap,
        desired: &ChildMap,
    ) -> Result<()> {
        let mut errors = Vec::new();

        // Delete observed objects that are no longer desired. This runs for
        // every kind regardless of update strategy: strategy only governs
        // how changes to still-desired objects are rolled out.
        for (gvk, group) in observed.groups() {
            let key = match self.resource_for(gvk) {
                Ok(key) => key,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            self.delete_undesired(key, parent, group, desired.group(gvk), &mut errors)
                .await;
        }

        // Create or update desired objects.
        for (gvk, group) in desired.groups() {
            let key = match self.resource_for(gvk) {
                Ok(key) => key,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            self.create_or_update(key, parent, observed.group(gvk), group, &mut errors)
                .await;
        }

        SyncError::aggregate(errors)
    }

    fn resource_for(&self, gvk: &GroupVersionKind) -> Result<&ResourceKey> {
        self.resources
            .get(gvk)
            .ok_or_else(|| SyncError::UnknownResource {
                api_version: format_api_version(&gvk.group, &gvk.version),
                resource: gvk.kind.clone(),
            })
    }

    async fn delete_undesired(
        &self,
        key: &ResourceKey,
        parent: &DynamicObject,
        observed: &HashMap<String, DynamicObject>,
        desired: Option<&HashMap<String, DynamicObject>>,
        errors: &mut Vec<SyncError>,
    ) {
        for (name, obj) in observed {
            if is_pending_deletion(obj) {
                continue;
            }
            if desired.is_some_and(|group| group.contains_key(name)) {
                continue;
            }

            tracing::info!(
                "{}: deleting {} {}",
                display_name(parent),
                key.kind,
                display_name(obj)
            );
            let outcome = self
                .driver
                .delete(
                    key,
                    obj.metadata.namespace.as_deref(),
                    name_of(obj),
                    Some(uid_of(obj)),
                )
                .await;
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    // Someone else already deleted it.
                }
                Err(err) => errors.push(err),
            }
        }
    }

    async fn create_or_update(
        &self,
        key: &ResourceKey,
        parent: &DynamicObject,
        observed: Option<&HashMap<String, DynamicObject>>,
        desired: &HashMap<String, DynamicObject>,
        errors: &mut Vec<SyncError>,
    ) {
        for (name, obj) in desired {
            let namespace = child_namespace(parent, obj);
            let outcome = match observed.and_then(|group| group.get(name)) {
                Some(old_obj) => self.update_child(key, parent, namespace, old_obj, obj).await,
                None => self.create_child(key, parent, namespace, obj).await,
            };
            if let Err(err) = outcome {
                errors.push(err);
            }
        }
    }

    async fn update_child(
        &self,
        key: &ResourceKey,
        parent: &DynamicObject,
        namespace: Option<&str>,
        old_obj: &DynamicObject,
        desired: &DynamicObject,
    ) -> Result<()> {
        let new_obj = apply_update(old_obj, desired)?;

        if objects_equal(&new_obj, old_obj)? {
            // Nothing changed.
            return Ok(());
        }
        if is_pending_deletion(old_obj) {
            // Never write to an object on its way out; a fresh copy gets
            // created once it is fully gone.
            return Ok(());
        }

        match self.strategies.method(&key.group, &key.kind) {
            ChildUpdateMethod::OnDelete => {
                // Wait for someone else to delete the object.
                Ok(())
            }
            ChildUpdateMethod::Recreate | ChildUpdateMethod::RollingRecreate => {
                // Delete now; the next pass recreates from scratch.
                tracing::info!(
                    "{}: deleting {} {} for update",
                    display_name(parent),
                    key.kind,
                    display_name(desired)
                );
                let outcome = self
                    .driver
                    .delete(key, namespace, name_of(desired), Some(uid_of(old_obj)))
                    .await;
                match outcome {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) => Err(err),
                }
            }
            ChildUpdateMethod::InPlace | ChildUpdateMethod::RollingInPlace => {
                tracing::info!(
                    "{}: updating {} {}",
                    display_name(parent),
                    key.kind,
                    display_name(desired)
                );
                match self.driver.update(key, namespace, &new_obj).await {
                    Ok(_) => Ok(()),
                    // Deleted or modified since we listed; the next pass
                    // re-derives the right action from fresh state.
                    Err(err) if err.is_not_found() || err.is_conflict() => Ok(()),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn create_child(
        &self,
        key: &ResourceKey,
        parent: &DynamicObject,
        namespace: Option<&str>,
        desired: &DynamicObject,
    ) -> Result<()> {
        tracing::info!(
            "{}: creating {} {}",
            display_name(parent),
            key.kind,
            display_name(desired)
        );

        // Record the desired partial before adding anything else, so future
        // merges see exactly what the hook asked for.
        let mut obj = desired.clone();
        let recorded = object_tree(&obj)?;
        set_last_applied(&mut obj, &recorded)?;

        // Everything we create is ours.
        let controller_ref = make_controller_ref(parent)?;
        obj.metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(controller_ref);

        match self.driver.create(key, namespace, &obj).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_exists() => {
                // Another actor created it first; reconcile it next pass.
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Children without a namespace of their own land in the parent's.
fn child_namespace<'o>(parent: &'o DynamicObject, obj: &'o DynamicObject) -> Option<&'o str> {
    obj.metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .or(parent.metadata.namespace.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChildUpdateStrategy;
    use crate::cluster::MockClusterDriver;
    use crate::object::testutil::{make_object, set_labels};
    use serde_json::json;

    fn pods_key() -> ResourceKey {
        ResourceKey::new("", "v1", "Pod", "pods", true)
    }

    fn pods_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("", "v1", "Pod")
    }

    fn resources() -> HashMap<GroupVersionKind, ResourceKey> {
        [(pods_gvk(), pods_key())].into()
    }

    fn strategies(method: ChildUpdateMethod) -> UpdateStrategyMap {
        let mut map = UpdateStrategyMap::new();
        map.insert(
            "",
            "Pod",
            ChildUpdateStrategy {
                method,
                ..Default::default()
            },
        );
        map
    }

    fn parent() -> DynamicObject {
        make_object(
            "apps.example.com/v1",
            "CatSet",
            Some("default"),
            "my-set",
            "parent-uid",
        )
    }

    fn desired_pod(name: &str, image: &str) -> DynamicObject {
        let mut obj = make_object("v1", "Pod", Some("default"), name, "");
        obj.metadata.uid = None;
        set_labels(&mut obj, &[("app", "cats")]);
        obj.data["spec"] = json!({"containers": [{"name": "main", "image": image}]});
        obj
    }

    fn child_map(parent: &DynamicObject, objects: Vec<DynamicObject>) -> ChildMap {
        let mut map = ChildMap::from_objects(parent, objects).unwrap();
        map.init_group(pods_gvk());
        map
    }

    async fn seed_created_pod(
        driver: &MockClusterDriver,
        parent: &DynamicObject,
        name: &str,
        image: &str,
    ) -> DynamicObject {
        // Run a real create pass so the stored pod carries the last-applied
        // annotation and owner reference, like a pod the engine made.
        let resources = HashMap::new();
        let strategies = UpdateStrategyMap::new();
        let reconciler = ChildReconciler::new(driver, &resources, &strategies);
        reconciler
            .create_child(&pods_key(), parent, Some("default"), &desired_pod(name, image))
            .await
            .unwrap();
        driver.object(&pods_key(), Some("default"), name).unwrap()
    }

    #[tokio::test]
    async fn test_create_missing_child() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);

        let observed = child_map(&parent, vec![]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:5")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        let stored = driver.object(&pods_key(), Some("default"), "redis").unwrap();
        assert_eq!(uid_of(&stored), "mock-uid-0");
        // Owner reference and last-applied annotation are set on create.
        let owner = &stored.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "parent-uid");
        assert_eq!(owner.controller, Some(true));
        let annotations = stored.metadata.annotations.as_ref().unwrap();
        let last_applied: Value =
            serde_json::from_str(&annotations[LAST_APPLIED_ANNOTATION]).unwrap();
        assert_eq!(
            last_applied["spec"]["containers"][0]["image"],
            "redis:5"
        );
        // The recorded partial does not include the owner reference.
        assert!(last_applied["metadata"].get("ownerReferences").is_none());
    }

    #[tokio::test]
    async fn test_delete_undesired_child_is_uid_preconditioned() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::OnDelete);
        let stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        // Deletion happens even under OnDelete; strategy only gates updates.
        assert_eq!(driver.operation_counts().deletes, 1);
        assert!(driver.object(&pods_key(), Some("default"), "redis").is_none());
    }

    #[tokio::test]
    async fn test_delete_swallows_not_found() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::OnDelete);
        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);

        // Observed snapshot contains a pod that is already gone.
        let mut ghost = desired_pod("ghost", "redis:5");
        ghost.metadata.uid = Some("ghost-uid".to_string());
        let observed = child_map(&parent, vec![ghost]);
        let desired = child_map(&parent, vec![]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();
        assert_eq!(driver.operation_counts().deletes, 1);
    }

    #[tokio::test]
    async fn test_delete_skips_pending_deletion() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::OnDelete);
        let mut stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        stored.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                k8s_openapi::chrono::Utc::now(),
            ),
        );
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();
        assert_eq!(driver.operation_counts().deletes, 0);
    }

    #[tokio::test]
    async fn test_in_place_update_sends_merged_object() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        let mut stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        // The cluster wrote fields the hook never asked for.
        stored.data["spec"]["nodeName"] = json!("node-7");
        stored.data["status"] = json!({"phase": "Running"});
        driver.insert_object(&pods_key(), stored.clone());
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:6")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        assert_eq!(driver.operation_counts().updates, 1);
        assert_eq!(driver.operation_counts().deletes, 0);
        let updated = driver.object(&pods_key(), Some("default"), "redis").unwrap();
        assert_eq!(
            updated.data["spec"]["containers"][0]["image"],
            "redis:6"
        );
        // Cluster-owned fields survive the update.
        assert_eq!(updated.data["spec"]["nodeName"], "node-7");
        assert_eq!(updated.data["status"]["phase"], "Running");
    }

    #[tokio::test]
    async fn test_on_delete_leaves_changed_child_alone() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::OnDelete);
        let stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:6")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        // The diff exists but OnDelete never acts on it.
        assert_eq!(driver.operation_counts().updates, 0);
        assert_eq!(driver.operation_counts().deletes, 0);
        assert_eq!(driver.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_recreate_deletes_changed_child() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::Recreate);
        let stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:6")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        // Deleted now; recreated on the next pass once it is gone.
        assert_eq!(driver.operation_counts().deletes, 1);
        assert_eq!(driver.operation_counts().creates, 0);
        assert!(driver.object(&pods_key(), Some("default"), "redis").is_none());
    }

    #[tokio::test]
    async fn test_unchanged_child_is_left_alone() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        let stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:5")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();

        assert_eq!(driver.operation_counts().updates, 0);
        assert_eq!(driver.operation_counts().deletes, 0);
    }

    #[tokio::test]
    async fn test_update_skips_child_pending_deletion() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        let mut stored = seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        stored.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                k8s_openapi::chrono::Utc::now(),
            ),
        );
        driver.insert_object(&pods_key(), stored.clone());
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![stored]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:6")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();
        assert_eq!(driver.operation_counts().updates, 0);
    }

    #[tokio::test]
    async fn test_create_swallows_already_exists() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = resources();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        // The pod exists in the cluster but was not in our observed snapshot.
        seed_created_pod(&driver, &parent, "redis", "redis:5").await;
        driver.reset_counts();

        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);
        let observed = child_map(&parent, vec![]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:5")]);
        reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap();
        assert_eq!(driver.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_unknown_child_kind_is_an_error() {
        let driver = MockClusterDriver::new();
        let parent = parent();
        let resources = HashMap::new();
        let strategies = strategies(ChildUpdateMethod::InPlace);
        let reconciler = ChildReconciler::new(&driver, &resources, &strategies);

        let observed = child_map(&parent, vec![]);
        let desired = child_map(&parent, vec![desired_pod("redis", "redis:5")]);
        let err = reconciler
            .reconcile(&parent, &observed, &desired)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownResource { .. }));
    }

    #[test]
    fn test_apply_update_reverts_system_fields_and_status() {
        let mut observed = desired_pod("redis", "redis:5");
        observed.metadata.uid = Some("u1".to_string());
        observed.metadata.resource_version = Some("42".to_string());
        observed.data["status"] = json!({"phase": "Running"});
        set_last_applied(&mut observed, &object_tree(&desired_pod("redis", "redis:5")).unwrap())
            .unwrap();

        // The hook tries to change identity fields and status.
        let mut desired = desired_pod("redis", "redis:6");
        desired.metadata.uid = Some("forged".to_string());
        desired.metadata.resource_version = Some("999".to_string());
        desired.data["status"] = json!({"phase": "Pending"});

        let new_obj = apply_update(&observed, &desired).unwrap();
        assert_eq!(new_obj.metadata.uid.as_deref(), Some("u1"));
        assert_eq!(new_obj.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(new_obj.data["status"]["phase"], "Running");
        assert_eq!(
            new_obj.data["spec"]["containers"][0]["image"],
            "redis:6"
        );
    }

    #[test]
    fn test_apply_update_is_stable_when_nothing_changed() {
        let mut observed = desired_pod("redis", "redis:5");
        observed.metadata.uid = Some("u1".to_string());
        set_last_applied(&mut observed, &object_tree(&desired_pod("redis", "redis:5")).unwrap())
            .unwrap();

        let new_obj = apply_update(&observed, &desired_pod("redis", "redis:5")).unwrap();
        assert!(objects_equal(&new_obj, &observed).unwrap());
    }
}
