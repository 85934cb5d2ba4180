//! StatefulSet reconciler
//!
//! Pinned addresses outlive their member pods on purpose; the workload's own
//! deletion is what frees them. Reconciliation probes the workload: still
//! present means nothing to do, gone means every pool sheds its allocations
//! in one pass.

use crds::{object_key, AllocateInfo, OFFSET_FULL, OFFSET_RESET};
use ipam::update_pool_with;
use k8s_openapi::api::apps::v1::StatefulSet;
use tracing::{error, info};

use super::Reconciler;
use crate::error::ControllerError;

impl Reconciler {
    pub async fn reconcile_stateful_set(&self, set: &StatefulSet) -> Result<(), ControllerError> {
        let name = set
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("StatefulSet missing name".to_string()))?;
        let namespace = set.metadata.namespace.as_deref().unwrap_or("default");

        match self.store.get_stateful_set(namespace, name).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(ControllerError::Store(e)),
        }

        self.release_stateful_set(namespace, name).await
    }

    /// Releases every address pinned for the workload, across all pools.
    /// A `Full` cursor is revived wherever at least one slot frees up.
    pub async fn release_stateful_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        let owner = object_key(namespace, name);
        info!("Releasing addresses of deleted StatefulSet {}", owner);

        let pools = self.store.list_pools().await?;
        let mut failed = false;
        for pool in pools {
            let Some(pool_name) = pool.metadata.name.clone() else {
                continue;
            };
            let owner_key = owner.clone();
            let result = update_pool_with(self.store.as_ref(), &pool_name, move |pool| {
                let Some(allocated) = pool
                    .status
                    .as_mut()
                    .and_then(|status| status.allocated_ips.as_mut())
                else {
                    return Ok(false);
                };
                let released: Vec<String> = allocated
                    .iter()
                    .filter(|(_, info)| {
                        matches!(info, AllocateInfo::StatefulSet { owner, .. } if *owner == owner_key)
                    })
                    .map(|(ip, _)| ip.clone())
                    .collect();
                if released.is_empty() {
                    return Ok(false);
                }
                for ip in &released {
                    allocated.remove(ip);
                }
                let Some(status) = pool.status.as_mut() else {
                    return Ok(false);
                };
                if status.offset == OFFSET_FULL {
                    status.offset = OFFSET_RESET;
                }
                pool.update_usage_counters();
                Ok(true)
            })
            .await;

            if let Err(e) = result {
                failed = true;
                error!(
                    "Failed to release addresses of StatefulSet {} in pool {}: {}",
                    owner, pool_name, e
                );
            }
        }

        if failed {
            return Err(ControllerError::ReleaseFailed(owner));
        }
        Ok(())
    }
}
