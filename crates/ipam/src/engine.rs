//! Allocation engine
//!
//! Arbitrates address allocation and release against pools shared by many
//! concurrent requesters. Every mutation is a single optimistic status
//! update; racers propose the same address, one write wins and the losers
//! re-read and move on to the next candidate, so the scan converges without
//! any coordination beyond the store's version check.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crds::{AllocateInfo, AllocateType, IPPool, OFFSET_FULL, OFFSET_IGNORE, OFFSET_RESET};
use ipnet::Ipv4Net;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::net_conf::NetConf;
use crate::store::{update_pool_with, PoolStore};

/// Attempts per allocation at finding and claiming a free address.
pub const FIND_RETRY_COUNT: usize = 5;

/// Direction of a pool status mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Del,
}

/// Outcome of one cursor scan over a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextIp {
    /// A free address, and the cursor position the pool should move to.
    Found { ip: Ipv4Addr, offset: i64 },
    /// Every scannable address is occupied or reserved.
    Full,
}

/// What the CNI caller gets back: one address with the subnet's mask, plus
/// the pool gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocResult {
    pub address: Ipv4Net,
    pub gateway: Ipv4Addr,
}

pub struct Ipam {
    store: Arc<dyn PoolStore>,
    namespace: String,
}

impl Ipam {
    /// `namespace` is where the pools live; the store is expected to scope
    /// its pool operations to it.
    pub fn new(store: Arc<dyn PoolStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn store(&self) -> &dyn PoolStore {
        self.store.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Allocates an address for the request and returns the CNI-shaped
    /// result. Retried invocations for an identity that already holds an
    /// address get that address back instead of a second reservation.
    pub async fn exec_add(&self, conf: &mut NetConf) -> Result<AllocResult, Error> {
        conf.valid()?;

        let (mut pool, reallocated) = self.target_pool(conf).await?;
        let pool_name = pool.metadata.name.clone().unwrap_or_default();
        if let Some(ip) = reallocated {
            info!("reallocate ip {} to the same request {}", ip, conf.allocate_id());
            return self.result(&pool, ip);
        }
        conf.pool = Some(pool_name.clone());
        info!("use ippool {} for {}", pool_name, conf.allocate_id());

        // static address path: no cursor movement
        if let Some(requested) = conf.ip.clone() {
            let ip: Ipv4Addr = requested
                .parse()
                .map_err(|_| Error::Validation(format!("invalid static ip {requested}")))?;
            info!("use static ip {} from pool {}", ip, pool_name);
            if !pool.contains(ip) {
                return Err(Error::StaticIpNotInPool {
                    ip: ip.to_string(),
                    pool: pool_name,
                });
            }
            let key = ip.to_string();
            if pool.used_ips().is_some_and(|m| m.contains_key(&key))
                || pool.allocated_ips().is_some_and(|m| m.contains_key(&key))
            {
                return Err(Error::StaticIpInUse(key));
            }
            conf.ip = Some(key);
            self.update_pool(conf, OFFSET_IGNORE, Op::Add).await?;
            return self.result(&pool, ip);
        }

        for retry in 0..FIND_RETRY_COUNT {
            if retry > 0 {
                pool = self.store.get_pool(&pool_name).await.map_err(|e| {
                    if e.is_not_found() {
                        Error::PoolNotFound(pool_name.clone())
                    } else {
                        Error::Store(e)
                    }
                })?;
                if pool.offset() == OFFSET_FULL {
                    return Err(Error::Exhausted(pool_name));
                }
            }

            match self.find_next(&pool)? {
                NextIp::Full => {
                    conf.ip = None;
                    if let Err(e) = self.update_pool(conf, OFFSET_FULL, Op::Add).await {
                        warn!("failed to mark pool {} full: {}", pool_name, e);
                        continue;
                    }
                    return Err(Error::Exhausted(pool_name));
                }
                NextIp::Found { ip, offset } => {
                    conf.ip = Some(ip.to_string());
                    match self.update_pool(conf, offset, Op::Add).await {
                        Ok(()) => return self.result(&pool, ip),
                        Err(e) => {
                            debug!(
                                "allocation of {} in pool {} lost the race ({}), rescanning",
                                ip, pool_name, e
                            );
                            continue;
                        }
                    }
                }
            }
        }

        Err(Error::FindFailed(pool_name))
    }

    /// Request well-formedness probe for CNI CHECK; touches no state.
    pub fn exec_check(&self, conf: &NetConf) -> Result<(), Error> {
        conf.valid()
    }

    /// Releases the request's address. Lenient by design: invalid requests,
    /// missing pools and unmatched identities all mean there is nothing
    /// left to release.
    pub async fn exec_del(&self, conf: &mut NetConf) -> Result<(), Error> {
        if let Err(e) = conf.valid() {
            warn!("invalid release request for {}: {}", conf.pod_str(), e);
            return Ok(());
        }

        // stateful members keep their address across restarts; reclamation
        // follows the workload's own deletion
        if conf.kind == AllocateType::StatefulSet {
            return Ok(());
        }

        if conf.pool.is_some() {
            return match self.update_pool(conf, OFFSET_RESET, Op::Del).await {
                Err(Error::Store(e)) if e.is_not_found() => Ok(()),
                Err(Error::PoolNotFound(_)) => Ok(()),
                other => other,
            };
        }

        let pools = match self.store.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("list ip pools error on release: {}", e);
                return Ok(());
            }
        };
        for pool in pools {
            let Some(name) = pool.metadata.name.clone() else {
                continue;
            };
            conf.pool = Some(name.clone());
            if let Err(e) = self.update_pool(conf, OFFSET_RESET, Op::Del).await {
                warn!("failed to release address in pool {}: {}", name, e);
            }
        }
        Ok(())
    }

    /// Answers which gateway serves `ip`, by scanning pool ranges.
    pub async fn fetch_gateway_by_ip(&self, ip: Ipv4Addr) -> Result<Option<Ipv4Addr>, Error> {
        let pools = self.store.list_pools().await?;
        for pool in pools {
            if pool.contains(ip) {
                return Ok(pool.spec.gateway.parse().ok());
            }
        }
        Ok(None)
    }

    /// Picks the pool to allocate from, and resolves reallocation: when the
    /// requesting identity already holds an address (here, or in any pool
    /// for unqualified requests), that address is returned alongside.
    async fn target_pool(&self, conf: &NetConf) -> Result<(IPPool, Option<Ipv4Addr>), Error> {
        if let Some(name) = conf.pool.clone() {
            let pool = self.store.get_pool(&name).await.map_err(|e| {
                if e.is_not_found() {
                    Error::PoolNotFound(name.clone())
                } else {
                    Error::Store(e)
                }
            })?;
            if let Some(ip) = reallocate(conf, &pool) {
                self.refresh_sandbox(conf, ip, &pool).await?;
                return Ok((pool, Some(ip)));
            }
            if conf.ip.is_none() && pool.offset() == OFFSET_FULL {
                return Err(Error::Exhausted(name));
            }
            return Ok((pool, None));
        }

        let pools = self.store.list_pools().await?;
        let mut target = None;
        for pool in pools {
            if let Some(ip) = reallocate(conf, &pool) {
                self.refresh_sandbox(conf, ip, &pool).await?;
                return Ok((pool, Some(ip)));
            }
            // first non-private pool with room, in store order
            if target.is_none() && !pool.spec.private && pool.offset() != OFFSET_FULL {
                target = Some(pool);
            }
        }
        target.map(|pool| (pool, None)).ok_or(Error::AllPoolsExhausted)
    }

    /// A pod retrying under a new sandbox keeps its address; the stored
    /// sandbox identity follows the latest invocation.
    async fn refresh_sandbox(
        &self,
        conf: &NetConf,
        ip: Ipv4Addr,
        pool: &IPPool,
    ) -> Result<(), Error> {
        if conf.kind != AllocateType::Pod {
            return Ok(());
        }
        let sandbox = conf.allocate_identify.clone().unwrap_or_default();
        let key = ip.to_string();
        if let Some(AllocateInfo::Pod { cid, .. }) =
            pool.allocated_ips().and_then(|m| m.get(&key))
        {
            if *cid == sandbox {
                return Ok(());
            }
        }

        let name = pool.metadata.name.clone().unwrap_or_default();
        let id = conf.allocate_id();
        info!("refresh sandbox of {} on ip {} in pool {}", id, key, name);
        update_pool_with(self.store.as_ref(), &name, |pool| {
            let Some(allocated) = pool
                .status
                .as_mut()
                .and_then(|status| status.allocated_ips.as_mut())
            else {
                return Ok(false);
            };
            match allocated.get_mut(&key) {
                Some(AllocateInfo::Pod { id: stored, cid }) if *stored == id => {
                    if *cid == sandbox {
                        Ok(false)
                    } else {
                        *cid = sandbox.clone();
                        Ok(true)
                    }
                }
                _ => Ok(false),
            }
        })
        .await?;
        Ok(())
    }

    /// One cursor scan over the pool range, starting at the stored offset.
    ///
    /// Skips the subnet's first and last address, the gateway, both
    /// occupancy maps and the except prefixes. A non-negative cursor at or
    /// past the range length means the pool shrank under the cursor; that
    /// surfaces as [`Error::StaleCursor`] until the reconciler resets it.
    pub fn find_next(&self, pool: &IPPool) -> Result<NextIp, Error> {
        let pool_name = pool.metadata.name.clone().unwrap_or_default();
        let Some(start_ip) = pool.start_ip() else {
            return Err(Error::Validation(format!(
                "pool {pool_name} has no usable range"
            )));
        };
        let length = pool.length();
        if length == 0 {
            return Err(Error::Validation(format!(
                "pool {pool_name} has no usable range"
            )));
        }
        let subnet: Ipv4Net = pool.spec.subnet.parse().map_err(|_| {
            Error::Validation(format!(
                "pool {} has invalid subnet {}",
                pool_name, pool.spec.subnet
            ))
        })?;
        let gateway: Option<Ipv4Addr> = pool.spec.gateway.parse().ok();
        let except: Vec<Ipv4Net> = pool
            .spec
            .except
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.parse().ok())
            .collect();

        let stored = pool.offset();
        if stored >= 0 && stored as u64 >= length {
            return Err(Error::StaleCursor {
                pool: pool_name,
                offset: stored,
                length,
            });
        }
        // negative cursors are sentinels; scanning restarts at position 0
        let origin = if stored < 0 { 0 } else { stored as u64 };

        let start = u32::from(start_ip);
        let subnet_first = subnet.network();
        let subnet_last = subnet.broadcast();

        let mut offset = origin;
        loop {
            let candidate = Ipv4Addr::from(start.wrapping_add(offset as u32));
            let key = candidate.to_string();
            let reserved = candidate == subnet_first
                || candidate == subnet_last
                || Some(candidate) == gateway
                || pool.used_ips().is_some_and(|m| m.contains_key(&key))
                || pool.allocated_ips().is_some_and(|m| m.contains_key(&key))
                || except.iter().any(|net| net.contains(&candidate));
            if !reserved {
                return Ok(NextIp::Found {
                    ip: candidate,
                    offset: ((offset + 1) % length) as i64,
                });
            }
            offset = (offset + 1) % length;
            if offset == origin {
                return Ok(NextIp::Full);
            }
        }
    }

    /// Applies one allocation mutation to the named pool under the shared
    /// optimistic retry loop.
    ///
    /// Adds short-circuit when the address is taken: a legacy entry or a
    /// foreign allocation is an error, while an entry equal to this request
    /// (identity and sandbox) is a true duplicate and succeeds without a
    /// write. Deletes remove the matching entry from either map, reviving a
    /// `Full` cursor so the scan can resume, and succeed without a write
    /// when nothing matches.
    pub async fn update_pool(&self, conf: &NetConf, offset: i64, op: Op) -> Result<(), Error> {
        let Some(name) = conf.pool.clone() else {
            return Err(Error::Validation("request names no pool".to_string()));
        };
        let info = conf.allocate_info();
        let ip = conf.ip.clone();
        let identify = conf.allocate_identify.clone().unwrap_or_default();

        update_pool_with(self.store.as_ref(), &name, move |pool| {
            let status = pool.status.get_or_insert_with(Default::default);
            match op {
                Op::Add => {
                    if offset != OFFSET_FULL {
                        let Some(ip) = ip.as_deref() else {
                            return Err(Error::Validation(
                                "allocation carries no ip".to_string(),
                            ));
                        };
                        if status.used_ips.as_ref().is_some_and(|m| m.contains_key(ip)) {
                            return Err(Error::IpExists);
                        }
                        if let Some(existing) =
                            status.allocated_ips.as_ref().and_then(|m| m.get(ip))
                        {
                            if existing.same_identity_and_sandbox(&info) {
                                return Ok(false);
                            }
                            return Err(Error::IpExists);
                        }
                        status
                            .allocated_ips
                            .get_or_insert_with(Default::default)
                            .insert(ip.to_string(), info.clone());
                    }
                    if offset != OFFSET_IGNORE {
                        status.offset = offset;
                    }
                    pool.update_usage_counters();
                    Ok(true)
                }
                Op::Del => {
                    let mut changed = false;
                    if !identify.is_empty() {
                        if let Some(used) = status.used_ips.as_mut() {
                            let key = used
                                .iter()
                                .find(|(_, v)| v.as_str() == identify)
                                .map(|(k, _)| k.clone());
                            if let Some(key) = key {
                                used.remove(&key);
                                changed = true;
                            }
                        }
                    }
                    if let Some(allocated) = status.allocated_ips.as_mut() {
                        let key = allocated
                            .iter()
                            .find(|(_, v)| {
                                !matches!(v, AllocateInfo::StatefulSet { .. })
                                    && v.same_identity_and_sandbox(&info)
                            })
                            .map(|(k, _)| k.clone());
                        if let Some(key) = key {
                            allocated.remove(&key);
                            changed = true;
                        }
                    }
                    if changed {
                        if status.offset == OFFSET_FULL {
                            status.offset = offset;
                        }
                        pool.update_usage_counters();
                    }
                    Ok(changed)
                }
            }
        })
        .await
        .map(|_| ())
    }

    /// Builds the CNI result: the address under the subnet's mask, and the
    /// pool gateway.
    pub fn result(&self, pool: &IPPool, ip: Ipv4Addr) -> Result<AllocResult, Error> {
        let subnet: Ipv4Net = pool.spec.subnet.parse().map_err(|_| {
            Error::Validation(format!(
                "pool {} has invalid subnet {}",
                pool.pool_key(),
                pool.spec.subnet
            ))
        })?;
        let gateway: Ipv4Addr = pool.spec.gateway.parse().map_err(|_| {
            Error::Validation(format!(
                "pool {} has invalid gateway {}",
                pool.pool_key(),
                pool.spec.gateway
            ))
        })?;
        let address = Ipv4Net::new(ip, subnet.prefix_len())
            .map_err(|_| Error::Validation(format!("invalid address {ip}")))?;
        Ok(AllocResult { address, gateway })
    }
}

/// Finds an existing allocation equal-by-identity to the request in this
/// pool. A request naming a different address than the one on record is not
/// a reallocation; it falls through to normal allocation and fails there.
pub(crate) fn reallocate(conf: &NetConf, pool: &IPPool) -> Option<Ipv4Addr> {
    if let Some(name) = &conf.pool {
        if Some(name.as_str()) != pool.metadata.name.as_deref() {
            return None;
        }
    }
    let allocated = pool.allocated_ips()?;
    let me = conf.allocate_info();
    for (key, existing) in allocated {
        if !existing.same_identity(&me) {
            continue;
        }
        match &conf.ip {
            Some(requested) if requested != key => {
                warn!(
                    "request ip {} differs from allocated ip {} for the same request {}",
                    requested,
                    key,
                    conf.allocate_id()
                );
                return None;
            }
            _ => return key.parse().ok(),
        }
    }
    None
}
