//! Stale address reaper
//!
//! A cooperative timer sweeping every pool for allocations whose consumer no
//! longer exists. A pod allocation is live only while the pod exists and
//! reports this address (a pod with no address yet is assumed transient and
//! kept); a pinned allocation is live while its owning workload exists;
//! addresses registered by the CNI itself are never reaped here.
//!
//! Each deletion re-reads the pool and confirms the address still maps to
//! the same record, so a reap racing the engine over a recycled address
//! backs off instead of freeing someone else's allocation.

use std::sync::Arc;
use std::time::Duration;

use crds::{split_object_key, AllocateInfo, IPPool, OFFSET_FULL, OFFSET_RESET};
use ipam::{update_pool_with, PoolStore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_REAP_PERIOD: Duration = Duration::from_secs(60);

pub struct StaleIpReaper {
    store: Arc<dyn PoolStore>,
    period: Duration,
}

impl StaleIpReaper {
    pub fn new(store: Arc<dyn PoolStore>, period: Duration) -> Self {
        Self { store, period }
    }

    pub async fn run(self) {
        info!("Starting stale ip reaper, period {:?}", self.period);
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over every pool in the namespace.
    pub async fn sweep(&self) {
        let pools = match self.store.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("failed to list ip pools for stale sweep: {}", e);
                return;
            }
        };
        for pool in pools {
            self.sweep_pool(&pool).await;
        }
    }

    async fn sweep_pool(&self, pool: &IPPool) {
        let Some(pool_name) = pool.metadata.name.clone() else {
            return;
        };
        let Some(allocated) = pool.allocated_ips() else {
            return;
        };

        for (ip, info) in allocated {
            let stale = match info {
                AllocateInfo::Pod { id, .. } => self.pod_is_stale(ip, id).await,
                AllocateInfo::StatefulSet { owner, .. } => self.owner_is_stale(owner).await,
                AllocateInfo::CniUsed { .. } => false,
            };
            if !stale {
                continue;
            }
            info!("ip {} in pool {} is stale, cleaning up", ip, pool_name);
            if let Err(e) = self.release_stale(&pool_name, ip, info).await {
                warn!("failed to clean stale ip {} in pool {}: {}", ip, pool_name, e);
            }
        }
    }

    async fn pod_is_stale(&self, ip: &str, id: &str) -> bool {
        let Some((namespace, name)) = split_object_key(id) else {
            warn!("can't derive pod namespace and name from allocate id {}", id);
            return false;
        };
        match self.store.get_pod(namespace, name).await {
            Ok(pod) => match pod.status.and_then(|status| status.pod_ip) {
                Some(pod_ip) if !pod_ip.is_empty() => pod_ip != ip,
                _ => false,
            },
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!("failed to get pod {} for stale sweep: {}", id, e);
                false
            }
        }
    }

    async fn owner_is_stale(&self, owner: &str) -> bool {
        let Some((namespace, name)) = split_object_key(owner) else {
            warn!("can't derive statefulset namespace and name from owner {}", owner);
            return false;
        };
        match self.store.get_stateful_set(namespace, name).await {
            Ok(_) => false,
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!("failed to get statefulset {} for stale sweep: {}", owner, e);
                false
            }
        }
    }

    /// Deletes one stale entry under the retry loop, skipping when the
    /// freshly read pool no longer maps the address to the expected record.
    pub(crate) async fn release_stale(
        &self,
        pool_name: &str,
        ip: &str,
        expect: &AllocateInfo,
    ) -> Result<(), ipam::Error> {
        update_pool_with(self.store.as_ref(), pool_name, |pool| {
            let Some(status) = pool.status.as_mut() else {
                return Ok(false);
            };
            let Some(allocated) = status.allocated_ips.as_mut() else {
                return Ok(false);
            };
            match allocated.get(ip) {
                Some(current) if current == expect => {}
                _ => {
                    debug!("ip {} in pool {} changed owner, skipping cleanup", ip, pool_name);
                    return Ok(false);
                }
            }
            allocated.remove(ip);
            if status.offset == OFFSET_FULL {
                status.offset = OFFSET_RESET;
            }
            pool.update_usage_counters();
            Ok(true)
        })
        .await
        .map(|_| ())
    }
}
