//! Main controller assembly.
//!
//! Builds the kube client and store, then runs the IPPool watcher, the
//! StatefulSet watcher and the stale-IP reaper as independent tasks that
//! only share state through the object store.

use std::sync::Arc;
use std::time::Duration;

use crds::IPPool;
use ipam::{KubeStore, PoolStore};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ControllerError;
use crate::reaper::StaleIpReaper;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;

pub struct Controller {
    ip_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    stateful_set_watcher: JoinHandle<Result<(), ControllerError>>,
    reaper: JoinHandle<()>,
}

impl Controller {
    pub async fn new(namespace: String, reap_period: Duration) -> Result<Self, ControllerError> {
        info!("Initializing IPAM controller");

        let client = Client::try_default().await?;
        let store: Arc<dyn PoolStore> = Arc::new(KubeStore::new(client.clone(), &namespace));

        let ip_pool_api: Api<IPPool> = Api::namespaced(client.clone(), &namespace);
        // stateful workloads live in their own namespaces
        let stateful_set_api: Api<StatefulSet> = Api::all(client);

        let reconciler = Arc::new(Reconciler::new(store.clone()));
        let watcher = Arc::new(Watcher::new(reconciler, ip_pool_api, stateful_set_api));

        let ip_pool_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_ip_pools().await })
        };
        let stateful_set_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_stateful_sets().await })
        };
        let reaper = tokio::spawn(StaleIpReaper::new(store, reap_period).run());

        Ok(Self {
            ip_pool_watcher,
            stateful_set_watcher,
            reaper,
        })
    }

    /// Runs until any task exits; they are all expected to run forever.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("IPAM controller running");

        tokio::select! {
            result = &mut self.ip_pool_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("IPPool watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("IPPool watcher error: {e}")))?;
            }
            result = &mut self.stateful_set_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("StatefulSet watcher panicked: {e}")))?
                    .map_err(|e| ControllerError::Watch(format!("StatefulSet watcher error: {e}")))?;
            }
            result = &mut self.reaper => {
                result.map_err(|e| ControllerError::Watch(format!("stale ip reaper panicked: {e}")))?;
            }
        }

        Ok(())
    }
}
