//! In-memory mock store for unit testing
//!
//! Implements [`PoolStore`] over mutex-guarded maps with real optimistic
//! concurrency: every status write checks the pool's resource version and
//! bumps it, so racing tasks genuinely conflict and exercise the retry
//! loops. Transient failures and spurious conflicts can be injected for
//! retry-budget tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use crds::IPPool;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::store::{PoolStore, StoreError};

#[derive(Default)]
pub struct MockStore {
    pools: Mutex<BTreeMap<String, IPPool>>,
    pods: Mutex<BTreeMap<(String, String), Pod>>,
    stateful_sets: Mutex<BTreeMap<(String, String), StatefulSet>>,
    /// Next N status updates fail with an injected transient error.
    fail_updates: Mutex<u32>,
    /// Next N status updates fail with an injected version conflict.
    conflict_updates: Mutex<u32>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pool, assigning a resource version when it has none.
    pub fn add_pool(&self, mut pool: IPPool) {
        let name = pool.metadata.name.clone().unwrap_or_default();
        if pool.metadata.resource_version.is_none() {
            pool.metadata.resource_version = Some("1".to_string());
        }
        self.pools.lock().unwrap().insert(name, pool);
    }

    pub fn remove_pool(&self, name: &str) {
        self.pools.lock().unwrap().remove(name);
    }

    /// Current stored state of a pool, for assertions.
    pub fn pool_snapshot(&self, name: &str) -> Option<IPPool> {
        self.pools.lock().unwrap().get(name).cloned()
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(key, pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.pods
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn add_stateful_set(&self, set: StatefulSet) {
        let key = (
            set.metadata.namespace.clone().unwrap_or_default(),
            set.metadata.name.clone().unwrap_or_default(),
        );
        self.stateful_sets.lock().unwrap().insert(key, set);
    }

    pub fn remove_stateful_set(&self, namespace: &str, name: &str) {
        self.stateful_sets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Makes the next `n` status updates fail with a transient error.
    pub fn fail_next_updates(&self, n: u32) {
        *self.fail_updates.lock().unwrap() = n;
    }

    /// Makes the next `n` status updates fail with a version conflict.
    pub fn conflict_next_updates(&self, n: u32) {
        *self.conflict_updates.lock().unwrap() = n;
    }

    fn take_injected_failure(&self, name: &str) -> Option<StoreError> {
        let mut conflicts = self.conflict_updates.lock().unwrap();
        if *conflicts > 0 {
            *conflicts -= 1;
            return Some(StoreError::Conflict(name.to_string()));
        }
        drop(conflicts);

        let mut failures = self.fail_updates.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Some(StoreError::Internal("injected store failure".to_string()));
        }
        None
    }
}

#[async_trait]
impl PoolStore for MockStore {
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError> {
        self.pools
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "IPPool",
                name: name.to_string(),
            })
    }

    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError> {
        Ok(self.pools.lock().unwrap().values().cloned().collect())
    }

    async fn update_pool_status(&self, pool: &IPPool) -> Result<IPPool, StoreError> {
        let name = pool.metadata.name.clone().unwrap_or_default();
        if let Some(err) = self.take_injected_failure(&name) {
            return Err(err);
        }

        let mut pools = self.pools.lock().unwrap();
        let stored = pools.get_mut(&name).ok_or_else(|| StoreError::NotFound {
            kind: "IPPool",
            name: name.clone(),
        })?;

        if stored.metadata.resource_version != pool.metadata.resource_version {
            return Err(StoreError::Conflict(name));
        }

        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        stored.status = pool.status.clone();
        stored.metadata.resource_version = Some((version + 1).to_string());
        Ok(stored.clone())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError> {
        self.pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Pod",
                name: format!("{namespace}/{name}"),
            })
    }

    async fn get_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<StatefulSet, StoreError> {
        self.stateful_sets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "StatefulSet",
                name: format!("{namespace}/{name}"),
            })
    }
}
