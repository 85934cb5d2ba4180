//! IPPool reconciler
//!
//! Any change to a pool's range (cidr, start, end, or the except set)
//! invalidates the scan cursor and the cached counters: the reconciler
//! resets the cursor and recomputes `total_count` as prefix arithmetic over
//! the allowed range minus the reservations.

use std::net::Ipv4Addr;

use crds::{IPPool, OFFSET_RESET};
use ipam::{ip_math, update_pool_with};
use ipnet::Ipv4Net;
use tracing::{debug, info};

use super::{RangeKey, Reconciler};
use crate::error::ControllerError;

impl Reconciler {
    pub async fn reconcile_ip_pool(&self, pool: &IPPool) -> Result<(), ControllerError> {
        let name = pool
            .metadata
            .name
            .clone()
            .ok_or_else(|| ControllerError::InvalidConfig("IPPool missing name".to_string()))?;
        let key = pool.pool_key();

        let range = RangeKey::of(pool);
        if self.seen_ranges().get(&key) == Some(&range) {
            debug!("IPPool {} range unchanged, skipping cursor reset", key);
            return Ok(());
        }

        info!("Reconciling IPPool {} after range change", key);
        let total = assignable_count(pool)?;

        update_pool_with(self.store.as_ref(), &name, |pool| {
            let status = pool.status.get_or_insert_with(Default::default);
            status.offset = OFFSET_RESET;
            status.total_count = total;
            pool.update_usage_counters();
            Ok(true)
        })
        .await?;

        self.seen_ranges().insert(key.clone(), range);
        info!("IPPool {} cursor reset, {} assignable addresses", key, total);
        Ok(())
    }
}

/// Size of the assignable set: the range cover minus the except prefixes,
/// the subnet's first and last address, and the gateway.
pub(crate) fn assignable_count(pool: &IPPool) -> Result<i64, ControllerError> {
    let spec = &pool.spec;
    let invalid = |what: &str, value: &str| {
        ControllerError::InvalidConfig(format!(
            "pool {} has invalid {} {}",
            pool.pool_key(),
            what,
            value
        ))
    };

    let cover: Vec<Ipv4Net> = match &spec.cidr {
        Some(cidr) => vec![cidr.parse().map_err(|_| invalid("cidr", cidr))?],
        None => {
            let (Some(start), Some(end)) = (pool.start_ip(), pool.end_ip()) else {
                return Err(ControllerError::InvalidConfig(format!(
                    "pool {} has no usable range",
                    pool.pool_key()
                )));
            };
            ip_math::summarize(start, end)
        }
    };

    let mut excludes: Vec<Ipv4Net> = Vec::new();
    for entry in spec.except.as_deref().unwrap_or_default() {
        excludes.push(entry.parse().map_err(|_| invalid("except entry", entry))?);
    }
    let subnet: Ipv4Net = spec
        .subnet
        .parse()
        .map_err(|_| invalid("subnet", &spec.subnet))?;
    let gateway: Ipv4Addr = spec
        .gateway
        .parse()
        .map_err(|_| invalid("gateway", &spec.gateway))?;
    for reserved in [subnet.network(), subnet.broadcast(), gateway] {
        let single = Ipv4Net::new(reserved, 32)
            .map_err(|_| invalid("reservation", &reserved.to_string()))?;
        excludes.push(single);
    }

    let residue = ip_math::prefix_difference(&cover, &excludes);
    Ok(ip_math::count_addresses(&residue) as i64)
}
