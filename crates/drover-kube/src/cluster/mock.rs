//! Mock cluster driver for testing
//!
//! Stores objects in memory and fabricates API-shaped errors (404/409 with
//! the proper reason), so engine code exercises the same classification
//! paths it would against a real API server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kube::core::{DynamicObject, ErrorResponse, TypeMeta};

use super::{ClusterDriver, ResourceKey};
use crate::error::{Result, SyncError};
use crate::object::name_of;

/// In-memory cluster driver for testing
#[derive(Clone, Default)]
pub struct MockClusterDriver {
    /// Storage: kind key -> namespace -> name -> object
    store: Arc<RwLock<HashMap<String, HashMap<String, HashMap<String, DynamicObject>>>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    uid_counter: Arc<AtomicU64>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

fn kind_key(key: &ResourceKey) -> String {
    format!("{}.{}", key.kind, key.group)
}

fn not_found(key: &ResourceKey, name: &str) -> SyncError {
    SyncError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} \"{}\" not found", key.plural, name),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn conflict(key: &ResourceKey, name: &str, message: &str) -> SyncError {
    SyncError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("Operation cannot be fulfilled on {} \"{}\": {}", key.plural, name, message),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

fn already_exists(key: &ResourceKey, name: &str) -> SyncError {
    SyncError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} \"{}\" already exists", key.plural, name),
        reason: "AlreadyExists".to_string(),
        code: 409,
    }))
}

impl MockClusterDriver {
    /// Create a new empty mock driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing operation counting. Missing
    /// identity fields (uid, resourceVersion, type metadata) are filled in
    /// the way a real server would on create.
    pub fn insert_object(&self, key: &ResourceKey, mut obj: DynamicObject) {
        self.materialize(key, &mut obj);
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        let name = name_of(&obj).to_string();
        let mut store = self.store.write().unwrap();
        store
            .entry(kind_key(key))
            .or_default()
            .entry(ns)
            .or_default()
            .insert(name, obj);
    }

    /// Fetch one stored object without counting the access.
    pub fn object(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        let store = self.store.read().unwrap();
        store
            .get(&kind_key(key))
            .and_then(|namespaces| namespaces.get(namespace.unwrap_or_default()))
            .and_then(|objects| objects.get(name))
            .cloned()
    }

    /// All stored objects of one kind (for assertions)
    pub fn objects(&self, key: &ResourceKey) -> Vec<DynamicObject> {
        let store = self.store.read().unwrap();
        store
            .get(&kind_key(key))
            .map(|namespaces| {
                namespaces
                    .values()
                    .flat_map(|objects| objects.values())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        let mut ops = self.operations.write().unwrap();
        *ops = OperationCounts::default();
    }

    fn materialize(&self, key: &ResourceKey, obj: &mut DynamicObject) {
        if obj.types.is_none() {
            obj.types = Some(TypeMeta {
                api_version: key.api_version(),
                kind: key.kind.clone(),
            });
        }
        if obj.metadata.uid.as_deref().unwrap_or_default().is_empty() {
            let next = self.uid_counter.fetch_add(1, Ordering::SeqCst);
            obj.metadata.uid = Some(format!("mock-uid-{next}"));
        }
        if obj
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or_default()
            .is_empty()
        {
            obj.metadata.resource_version = Some("1".to_string());
        }
    }
}

fn bump_resource_version(obj: &mut DynamicObject) {
    let next = obj
        .metadata
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj.metadata.resource_version = Some(next.to_string());
}

#[async_trait]
impl ClusterDriver for MockClusterDriver {
    async fn get(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.gets += 1;
        }

        Ok(self.object(key, namespace, name))
    }

    async fn list(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.lists += 1;
        }

        let store = self.store.read().unwrap();
        let Some(namespaces) = store.get(&kind_key(key)) else {
            return Ok(Vec::new());
        };
        let objects = match namespace {
            Some(ns) => namespaces
                .get(ns)
                .map(|objects| objects.values().cloned().collect())
                .unwrap_or_default(),
            None => namespaces
                .values()
                .flat_map(|objects| objects.values())
                .cloned()
                .collect(),
        };
        Ok(objects)
    }

    async fn create(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.creates += 1;
        }

        let mut stored = obj.clone();
        if key.namespaced && stored.metadata.namespace.is_none() {
            stored.metadata.namespace = namespace.map(|ns| ns.to_string());
        }
        // Creates never carry over client-supplied identity.
        stored.metadata.uid = None;
        stored.metadata.resource_version = None;
        self.materialize(key, &mut stored);

        let ns = stored.metadata.namespace.clone().unwrap_or_default();
        let name = name_of(&stored).to_string();
        let mut store = self.store.write().unwrap();
        let objects = store
            .entry(kind_key(key))
            .or_default()
            .entry(ns)
            .or_default();
        if objects.contains_key(&name) {
            return Err(already_exists(key, &name));
        }
        objects.insert(name, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.updates += 1;
        }

        let ns = obj
            .metadata
            .namespace
            .as_deref()
            .or(namespace)
            .unwrap_or_default()
            .to_string();
        let name = name_of(obj).to_string();
        let mut store = self.store.write().unwrap();
        let current = store
            .get_mut(&kind_key(key))
            .and_then(|namespaces| namespaces.get_mut(&ns))
            .and_then(|objects| objects.get_mut(&name))
            .ok_or_else(|| not_found(key, &name))?;

        if obj.metadata.resource_version != current.metadata.resource_version {
            return Err(conflict(key, &name, "the object has been modified"));
        }

        let mut updated = obj.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        bump_resource_version(&mut updated);
        *current = updated.clone();
        Ok(updated)
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.status_updates += 1;
        }

        let ns = obj
            .metadata
            .namespace
            .as_deref()
            .or(namespace)
            .unwrap_or_default()
            .to_string();
        let name = name_of(obj).to_string();
        let mut store = self.store.write().unwrap();
        let current = store
            .get_mut(&kind_key(key))
            .and_then(|namespaces| namespaces.get_mut(&ns))
            .and_then(|objects| objects.get_mut(&name))
            .ok_or_else(|| not_found(key, &name))?;

        if obj.metadata.resource_version != current.metadata.resource_version {
            return Err(conflict(key, &name, "the object has been modified"));
        }

        match obj.data.get("status") {
            Some(status) => current.data["status"] = status.clone(),
            None => {
                if let Some(data) = current.data.as_object_mut() {
                    data.remove("status");
                }
            }
        }
        bump_resource_version(current);
        Ok(current.clone())
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
        expected_uid: Option<&str>,
    ) -> Result<()> {
        {
            let mut ops = self.operations.write().unwrap();
            ops.deletes += 1;
        }

        let ns = namespace.unwrap_or_default().to_string();
        let mut store = self.store.write().unwrap();
        let objects = store
            .get_mut(&kind_key(key))
            .and_then(|namespaces| namespaces.get_mut(&ns))
            .ok_or_else(|| not_found(key, name))?;
        let current = objects.get(name).ok_or_else(|| not_found(key, name))?;

        if let Some(uid) = expected_uid {
            if current.metadata.uid.as_deref() != Some(uid) {
                return Err(conflict(key, name, "uid precondition failed"));
            }
        }
        objects.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::testutil::make_object;

    fn pods() -> ResourceKey {
        ResourceKey::new("", "v1", "Pod", "pods", true)
    }

    #[tokio::test]
    async fn test_mock_create_and_get() {
        let driver = MockClusterDriver::new();
        let key = pods();

        let created = driver
            .create(&key, Some("default"), &make_object("v1", "Pod", Some("default"), "web-0", ""))
            .await
            .unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

        let fetched = driver.get(&key, Some("default"), "web-0").await.unwrap();
        assert_eq!(name_of(&fetched.unwrap()), "web-0");

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_mock_get_missing_is_none() {
        let driver = MockClusterDriver::new();
        let found = driver.get(&pods(), Some("default"), "ghost").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_mock_create_duplicate_fails() {
        let driver = MockClusterDriver::new();
        let key = pods();
        let obj = make_object("v1", "Pod", Some("default"), "web-0", "");

        driver.create(&key, Some("default"), &obj).await.unwrap();
        let err = driver.create(&key, Some("default"), &obj).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn test_mock_update_requires_current_resource_version() {
        let driver = MockClusterDriver::new();
        let key = pods();
        let created = driver
            .create(&key, Some("default"), &make_object("v1", "Pod", Some("default"), "web-0", ""))
            .await
            .unwrap();

        let mut fresh = created.clone();
        fresh.data["spec"] = serde_json::json!({"replicas": 2});
        let updated = driver.update(&key, Some("default"), &fresh).await.unwrap();
        assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));

        // The first copy is now stale.
        let err = driver.update(&key, Some("default"), &created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mock_update_preserves_uid() {
        let driver = MockClusterDriver::new();
        let key = pods();
        let created = driver
            .create(&key, Some("default"), &make_object("v1", "Pod", Some("default"), "web-0", ""))
            .await
            .unwrap();

        let mut rewrite = created.clone();
        rewrite.metadata.uid = Some("forged".to_string());
        let updated = driver.update(&key, Some("default"), &rewrite).await.unwrap();
        assert_eq!(updated.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_mock_update_status_leaves_rest_alone() {
        let driver = MockClusterDriver::new();
        let key = pods();
        let mut obj = make_object("v1", "Pod", Some("default"), "web-0", "");
        obj.data["spec"] = serde_json::json!({"replicas": 1});
        let created = driver.create(&key, Some("default"), &obj).await.unwrap();

        let mut with_status = created.clone();
        with_status.data["spec"] = serde_json::json!({"replicas": 99});
        with_status.data["status"] = serde_json::json!({"phase": "Running"});
        driver
            .update_status(&key, Some("default"), &with_status)
            .await
            .unwrap();

        let stored = driver.object(&key, Some("default"), "web-0").unwrap();
        assert_eq!(stored.data["status"]["phase"], "Running");
        assert_eq!(stored.data["spec"]["replicas"], 1);
    }

    #[tokio::test]
    async fn test_mock_delete_uid_precondition() {
        let driver = MockClusterDriver::new();
        let key = pods();
        let created = driver
            .create(&key, Some("default"), &make_object("v1", "Pod", Some("default"), "web-0", ""))
            .await
            .unwrap();

        let err = driver
            .delete(&key, Some("default"), "web-0", Some("wrong-uid"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        driver
            .delete(&key, Some("default"), "web-0", created.metadata.uid.as_deref())
            .await
            .unwrap();
        assert!(driver.object(&key, Some("default"), "web-0").is_none());

        let err = driver
            .delete(&key, Some("default"), "web-0", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_list_by_namespace_and_all() {
        let driver = MockClusterDriver::new();
        let key = pods();
        driver.insert_object(&key, make_object("v1", "Pod", Some("default"), "a", ""));
        driver.insert_object(&key, make_object("v1", "Pod", Some("default"), "b", ""));
        driver.insert_object(&key, make_object("v1", "Pod", Some("staging"), "c", ""));

        let in_default = driver.list(&key, Some("default")).await.unwrap();
        assert_eq!(in_default.len(), 2);

        let everywhere = driver.list(&key, None).await.unwrap();
        assert_eq!(everywhere.len(), 3);

        let empty = driver.list(&key, Some("missing")).await.unwrap();
        assert!(empty.is_empty());
    }
}
