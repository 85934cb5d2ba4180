//! Kubernetes-backed store
//!
//! Maps the [`PoolStore`] contract onto `kube` API calls. Pools are
//! namespaced to the coordinator's namespace; pods and stateful sets are
//! read from their own namespaces. Status writes go through the status
//! subresource so the resource version check applies.

use async_trait::async_trait;
use crds::IPPool;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};

use crate::store::{PoolStore, StoreError};

pub struct KubeStore {
    client: Client,
    pools: Api<IPPool>,
    namespace: String,
}

impl KubeStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pools: Api::namespaced(client.clone(), namespace),
            client,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn map_err(kind: &'static str, name: &str, err: kube::Error) -> StoreError {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ref response) if response.code == 409 => {
                StoreError::Conflict(name.to_string())
            }
            other => StoreError::Kube(other),
        }
    }
}

#[async_trait]
impl PoolStore for KubeStore {
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError> {
        self.pools
            .get(name)
            .await
            .map_err(|e| Self::map_err("IPPool", name, e))
    }

    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError> {
        let list = self
            .pools
            .list(&ListParams::default())
            .await
            .map_err(StoreError::Kube)?;
        Ok(list.items)
    }

    async fn update_pool_status(&self, pool: &IPPool) -> Result<IPPool, StoreError> {
        let name = pool
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Internal("pool has no name".to_string()))?;
        let data = serde_json::to_vec(pool)
            .map_err(|e| StoreError::Internal(format!("serialize pool {name}: {e}")))?;
        self.pools
            .replace_status(name, &PostParams::default(), data)
            .await
            .map_err(|e| Self::map_err("IPPool", name, e))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(name)
            .await
            .map_err(|e| Self::map_err("Pod", name, e))
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, StoreError> {
        let sets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        sets.get(name)
            .await
            .map_err(|e| Self::map_err("StatefulSet", name, e))
    }
}
