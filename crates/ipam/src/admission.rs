//! Admission rules for pool create, update and delete
//!
//! The webhook transport hands each request to one of the three rule
//! functions here. The overlap guard is a member of this component, not a
//! process global, so tests and alternative transports construct their own.
//! Deployments must run a single admission instance: the guard's reservation
//! cache does not cross processes.

use std::sync::Arc;

use crds::{validate_pool, IPPool, OverlapGuard, ValidationError};
use ipnet::Ipv4Net;
use tracing::info;

use crate::error::Error;
use crate::store::PoolStore;

pub struct PoolAdmission {
    store: Arc<dyn PoolStore>,
    guard: OverlapGuard,
}

impl PoolAdmission {
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            store,
            guard: OverlapGuard::default(),
        }
    }

    /// Construction with an explicit guard, for tests that shrink the TTL.
    pub fn with_guard(store: Arc<dyn PoolStore>, guard: OverlapGuard) -> Self {
        Self { store, guard }
    }

    pub async fn validate_create(&self, pool: &IPPool) -> Result<(), Error> {
        info!("validate create ippool {}", pool.pool_key());
        validate_pool(pool)?;
        let persisted = self.store.list_pools().await?;
        self.guard.check(&persisted, pool, None)?;
        Ok(())
    }

    /// Update rules: gateway and subnet are immutable, a CIDR can only grow,
    /// and every occupied address must survive the new range.
    pub async fn validate_update(&self, old: &IPPool, new: &IPPool) -> Result<(), Error> {
        let key = new.pool_key();
        info!("validate update ippool {}", key);
        if old.spec == new.spec {
            return Ok(());
        }

        if old.spec.gateway != new.spec.gateway {
            return Err(ValidationError::GatewayChanged {
                old: old.spec.gateway.clone(),
                new: new.spec.gateway.clone(),
            }
            .into());
        }
        if old.spec.subnet != new.spec.subnet {
            return Err(ValidationError::SubnetChanged {
                old: old.spec.subnet.clone(),
                new: new.spec.subnet.clone(),
            }
            .into());
        }

        if let (Some(old_cidr), Some(new_cidr)) = (&old.spec.cidr, &new.spec.cidr) {
            let old_net: Ipv4Net = old_cidr
                .parse()
                .map_err(|_| ValidationError::InvalidCidr(old_cidr.clone()))?;
            let new_net: Ipv4Net = new_cidr
                .parse()
                .map_err(|_| ValidationError::InvalidCidr(new_cidr.clone()))?;
            if !new_net.contains(&old_net.network()) || !new_net.contains(&old_net.broadcast()) {
                return Err(ValidationError::CidrShrunk {
                    old: old_cidr.clone(),
                    new: new_cidr.clone(),
                }
                .into());
            }
        }

        validate_pool(new)?;
        let persisted = self.store.list_pools().await?;
        self.guard.check(&persisted, new, Some(key.as_str()))?;
        Ok(())
    }

    /// A pool leaves only once it is empty; accepting the delete tombstones
    /// its reservation-cache entry so the range frees up immediately.
    pub async fn validate_delete(&self, pool: &IPPool) -> Result<(), Error> {
        let key = pool.pool_key();
        info!("validate delete ippool {}", key);
        let occupied = pool.occupied_count();
        if occupied > 0 {
            return Err(ValidationError::PoolInUse(occupied).into());
        }
        self.guard.forget(&key);
        Ok(())
    }
}
