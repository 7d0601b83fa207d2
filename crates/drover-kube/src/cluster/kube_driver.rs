//! Kubernetes API cluster driver
//!
//! Talks to the API server through dynamically-typed clients, so the engine
//! can manage any resource kind named in a controller definition without
//! compiled-in types.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions, PropagationPolicy};
use kube::core::DynamicObject;
use kube::Client;

use super::{ClusterDriver, ResourceKey};
use crate::error::Result;
use crate::object::name_of;

/// Cluster driver backed by a real Kubernetes API server
#[derive(Clone)]
pub struct KubeDriver {
    client: Client,
}

impl KubeDriver {
    /// Create a new driver using the default client configuration
    /// (in-cluster config, or the local kubeconfig when running outside).
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create with an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Get a dynamic API handle scoped to one namespace, or to the whole
    /// cluster for cluster-scoped resources and all-namespace lists.
    fn api(&self, key: &ResourceKey, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = key.api_resource();
        match namespace {
            Some(ns) if key.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ClusterDriver for KubeDriver {
    async fn get(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(key, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(key, namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let created = self
            .api(key, namespace)
            .create(&PostParams::default(), obj)
            .await?;
        Ok(created)
    }

    async fn update(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let updated = self
            .api(key, namespace)
            .replace(name_of(obj), &PostParams::default(), obj)
            .await?;
        Ok(updated)
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let updated = self
            .api(key, namespace)
            .replace_status(name_of(obj), &PostParams::default(), serde_json::to_vec(obj)?)
            .await?;
        Ok(updated)
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        namespace: Option<&str>,
        name: &str,
        expected_uid: Option<&str>,
    ) -> Result<()> {
        // Background propagation so dependents are cleaned up by the garbage
        // collector; the uid precondition refuses to delete a replacement
        // object that reused the name.
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            preconditions: expected_uid.map(|uid| Preconditions {
                uid: Some(uid.to_string()),
                resource_version: None,
            }),
            ..Default::default()
        };
        self.api(key, namespace).delete(name, &params).await?;
        Ok(())
    }
}
