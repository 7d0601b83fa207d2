//! Cluster access for schema-less resources
//!
//! The engine talks to the API server through the [`ClusterDriver`] trait so
//! reconciliation logic can run against the real cluster or an in-memory
//! mock:
//! - **Kube** (default): direct API calls via a dynamically-typed [`kube::Api`]
//! - **Mock**: in-memory store with operation counting, for tests
//!
//! All reads issued here go straight to the backing store, never through a
//! watch cache, so adoption re-checks see the freshest state available.

mod kube_driver;
mod mock;

pub use kube_driver::KubeDriver;
pub use mock::{MockClusterDriver, OperationCounts};

use std::time::Duration;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};

use crate::error::{Result, SyncError};
use crate::object::{display_name, kind_of, name_of, uid_of};

/// Attempts per optimistic-concurrency write before giving up.
const UPDATE_RETRIES: u32 = 4;

/// Identifies one resource type as the API server names it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Lowercase plural name, e.g. "pods".
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKey {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        crate::object::format_api_version(&self.group, &self.version)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(&self.gvk(), &self.plural)
    }
}

/// Raw object operations against one cluster.
///
/// Implementations must be Send + Sync for use across async tasks. Errors
/// keep their API status codes intact so callers can classify races
/// (NotFound, Conflict, AlreadyExists) and swallow them where appropriate.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Fetch one object; Ok(None) when it doesn't exist.
    async fn get(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List all objects of a kind, in one namespace or across all.
    async fn list(&self, key: &ResourceKey, namespace: Option<&str>)
        -> Result<Vec<DynamicObject>>;

    async fn create(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replace an object; the write carries the object's resourceVersion and
    /// fails with a conflict if it is stale.
    async fn update(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replace only the status subresource.
    async fn update_status(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Delete with background propagation. When `expected_uid` is given the
    /// delete is preconditioned on it, so a same-named replacement object is
    /// never deleted by mistake.
    async fn delete(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
        expected_uid: Option<&str>,
    ) -> Result<()>;
}

/// GET/PUT loop with conflict retry.
///
/// `mutate` is re-applied to a freshly fetched copy on every attempt and
/// returns false to signal there is nothing left to change. The loop aborts
/// with [`SyncError::ObjectGone`] if the object disappears or its UID no
/// longer matches `orig`, meaning it was deleted and replaced mid-flight.
pub async fn update_with_retries<D, F>(
    driver: &D,
    key: &ResourceKey,
    orig: &DynamicObject,
    mut mutate: F,
) -> Result<DynamicObject>
where
    D: ClusterDriver + ?Sized,
    F: FnMut(&mut DynamicObject) -> bool + Send,
{
    let namespace = orig.metadata.namespace.clone();
    let name = name_of(orig).to_string();
    let mut attempt = 0;
    let mut delay = Duration::from_millis(10);
    loop {
        let current = driver
            .get(key, namespace.as_deref(), &name)
            .await?
            .ok_or_else(|| SyncError::ObjectGone {
                kind: kind_of(orig).to_string(),
                object: display_name(orig),
                message: "object no longer exists".to_string(),
            })?;
        if uid_of(&current) != uid_of(orig) {
            return Err(SyncError::ObjectGone {
                kind: kind_of(orig).to_string(),
                object: display_name(orig),
                message: format!("got uid {}, want uid {}", uid_of(&current), uid_of(orig)),
            });
        }
        let mut current = current;
        if !mutate(&mut current) {
            return Ok(current);
        }
        match driver.update(key, namespace.as_deref(), &current).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt < UPDATE_RETRIES => {
                attempt += 1;
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(5);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Like [`update_with_retries`], but writes through the status subresource.
pub async fn update_status_with_retries<D, F>(
    driver: &D,
    key: &ResourceKey,
    orig: &DynamicObject,
    mut mutate: F,
) -> Result<DynamicObject>
where
    D: ClusterDriver + ?Sized,
    F: FnMut(&mut DynamicObject) -> bool + Send,
{
    let namespace = orig.metadata.namespace.clone();
    let name = name_of(orig).to_string();
    let mut attempt = 0;
    let mut delay = Duration::from_millis(10);
    loop {
        let current = driver
            .get(key, namespace.as_deref(), &name)
            .await?
            .ok_or_else(|| SyncError::ObjectGone {
                kind: kind_of(orig).to_string(),
                object: display_name(orig),
                message: "object no longer exists".to_string(),
            })?;
        if uid_of(&current) != uid_of(orig) {
            return Err(SyncError::ObjectGone {
                kind: kind_of(orig).to_string(),
                object: display_name(orig),
                message: format!("got uid {}, want uid {}", uid_of(&current), uid_of(orig)),
            });
        }
        let mut current = current;
        if !mutate(&mut current) {
            return Ok(current);
        }
        match driver.update_status(key, namespace.as_deref(), &current).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt < UPDATE_RETRIES => {
                attempt += 1;
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(5);
            }
            Err(e) => return Err(e),
        }
    }
}
