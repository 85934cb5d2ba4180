//! Kubernetes resource watchers.
//!
//! IPPool events run through `kube_runtime::Controller`, which handles
//! reconnection, retry and backoff. StatefulSets are watched as a raw event
//! stream instead: only deletions matter there, and a deletion must still
//! reach the reconciler after the object has left the cache.

use std::sync::Arc;
use std::time::Duration;

use crds::IPPool;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Api;
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller, WatchStreamExt};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::reconciler::Reconciler;

/// Generic Controller-backed watch loop shared by object watchers.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(
            Arc<Reconciler>,
            Arc<K>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Action, ControllerError>> + Send>,
        > + Send
        + Sync
        + Clone
        + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |_obj: Arc<K>, error: &ControllerError, _ctx: Arc<Reconciler>| {
        error!("Reconciliation error for {}: {}", resource_name, error);
        Action::requeue(Duration::from_secs(60))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling a {} event", resource_name);
            reconcile_fn(ctx, obj).await
        }
    };

    // debounce batches status churn; modest concurrency keeps API load sane
    let config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(2);

    Controller::new(api, watcher::Config::default())
        .with_config(config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(e) = result {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the resources the IPAM controller reacts to.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    ip_pool_api: Api<IPPool>,
    stateful_set_api: Api<StatefulSet>,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        ip_pool_api: Api<IPPool>,
        stateful_set_api: Api<StatefulSet>,
    ) -> Self {
        Self {
            reconciler,
            ip_pool_api,
            stateful_set_api,
        }
    }

    /// Starts watching IPPool resources.
    pub async fn watch_ip_pools(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.ip_pool_api.clone(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move {
                    match reconciler.reconcile_ip_pool(&resource).await {
                        Ok(()) => Ok(Action::await_change()),
                        Err(e) => Err(e),
                    }
                })
            },
            "IPPool",
        )
        .await
    }

    /// Watches StatefulSet deletions to release their pinned addresses.
    pub async fn watch_stateful_sets(&self) -> Result<(), ControllerError> {
        info!("Starting StatefulSet watcher");
        let stream =
            watcher(self.stateful_set_api.clone(), watcher::Config::default()).default_backoff();
        let mut stream = std::pin::pin!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Delete(set)) => {
                    if let Err(e) = self.reconciler.reconcile_stateful_set(&set).await {
                        error!("Failed to handle StatefulSet deletion: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("StatefulSet watch error: {}", e),
            }
        }
        Ok(())
    }
}
