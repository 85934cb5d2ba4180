//! Admission-time pool validation
//!
//! Two layers run on every admission request: [`validate_pool`] checks a
//! single pool's self-consistency, and [`OverlapGuard`] rejects pools whose
//! address range intersects another pool — persisted or admitted moments ago
//! and not yet visible in the store.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use thiserror::Error;

use crate::ip_pool::IPPool;

/// How long a freshly admitted pool stays in the overlap-guard cache.
pub const OVERLAP_GUARD_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid subnet {0}")]
    InvalidSubnet(String),

    #[error("invalid gateway {0}")]
    InvalidGateway(String),

    #[error("gateway {gateway} is not a usable address in subnet {subnet}")]
    GatewayUnusable { gateway: String, subnet: String },

    #[error("pool must set exactly one of cidr or start/end")]
    AmbiguousRange,

    #[error("pool must set both start and end for a range pool")]
    IncompleteRange,

    #[error("invalid cidr {0}")]
    InvalidCidr(String),

    #[error("invalid range address {0}")]
    InvalidRangeAddress(String),

    #[error("range start {start} is after end {end}")]
    InvertedRange { start: String, end: String },

    #[error("invalid except entry {0}")]
    InvalidExcept(String),

    #[error("except entries require the cidr form")]
    ExceptWithoutCidr,

    #[error("pool range {start}-{end} is not contained in subnet {subnet}")]
    RangeOutsideSubnet {
        start: String,
        end: String,
        subnet: String,
    },

    #[error("occupied ip {0} would fall outside the updated pool")]
    OccupiedOutsideRange(String),

    #[error(
        "{candidate} (want add) conflict with {existing} (exist), range {candidate_range} overlaps {existing_range}"
    )]
    Overlap {
        candidate: String,
        existing: String,
        candidate_range: String,
        existing_range: String,
    },

    #[error("can't modify pool gateway from {old} to {new}")]
    GatewayChanged { old: String, new: String },

    #[error("can't modify pool subnet from {old} to {new}")]
    SubnetChanged { old: String, new: String },

    #[error("new cidr {new} must contain the old cidr {old}")]
    CidrShrunk { old: String, new: String },

    #[error("pool still holds {0} occupied addresses")]
    PoolInUse(usize),
}

/// Checks a single pool's self-consistency.
///
/// On updates the pool carries its current occupancy maps; every occupied
/// address must survive the new range, otherwise the update is refused.
pub fn validate_pool(pool: &IPPool) -> Result<(), ValidationError> {
    let spec = &pool.spec;

    let subnet: Ipv4Net = spec
        .subnet
        .parse()
        .map_err(|_| ValidationError::InvalidSubnet(spec.subnet.clone()))?;
    let gateway: Ipv4Addr = spec
        .gateway
        .parse()
        .map_err(|_| ValidationError::InvalidGateway(spec.gateway.clone()))?;
    if !subnet.contains(&gateway) || gateway == subnet.network() {
        return Err(ValidationError::GatewayUnusable {
            gateway: spec.gateway.clone(),
            subnet: spec.subnet.clone(),
        });
    }

    match &spec.cidr {
        Some(cidr) => {
            if spec.start.is_some() || spec.end.is_some() {
                return Err(ValidationError::AmbiguousRange);
            }
            cidr.parse::<Ipv4Net>()
                .map_err(|_| ValidationError::InvalidCidr(cidr.clone()))?;
            for except in spec.except.as_deref().unwrap_or_default() {
                except
                    .parse::<Ipv4Net>()
                    .map_err(|_| ValidationError::InvalidExcept(except.clone()))?;
            }
        }
        None => {
            if spec.except.as_deref().is_some_and(|e| !e.is_empty()) {
                return Err(ValidationError::ExceptWithoutCidr);
            }
            let (Some(start), Some(end)) = (&spec.start, &spec.end) else {
                return Err(ValidationError::IncompleteRange);
            };
            let start_ip: Ipv4Addr = start
                .parse()
                .map_err(|_| ValidationError::InvalidRangeAddress(start.clone()))?;
            let end_ip: Ipv4Addr = end
                .parse()
                .map_err(|_| ValidationError::InvalidRangeAddress(end.clone()))?;
            if u32::from(start_ip) > u32::from(end_ip) {
                return Err(ValidationError::InvertedRange {
                    start: start.clone(),
                    end: end.clone(),
                });
            }
        }
    }

    // Both forms parse by now, so the derived endpoints exist.
    let (Some(start_ip), Some(end_ip)) = (pool.start_ip(), pool.end_ip()) else {
        return Err(ValidationError::IncompleteRange);
    };
    if !subnet.contains(&start_ip) || !subnet.contains(&end_ip) {
        return Err(ValidationError::RangeOutsideSubnet {
            start: start_ip.to_string(),
            end: end_ip.to_string(),
            subnet: spec.subnet.clone(),
        });
    }

    let occupied = pool
        .used_ips()
        .into_iter()
        .flat_map(|m| m.keys())
        .chain(pool.allocated_ips().into_iter().flat_map(|m| m.keys()));
    for key in occupied {
        let inside = key
            .parse::<Ipv4Addr>()
            .map(|ip| pool.contains(ip))
            .unwrap_or(false);
        if !inside {
            return Err(ValidationError::OccupiedOutsideRange(key.clone()));
        }
    }

    Ok(())
}

struct PendingPool {
    pool: IPPool,
    expires_at: Instant,
}

/// Rejects a candidate pool whose `[start, end]` interval intersects any
/// persisted pool or any pool admitted within the last few seconds.
///
/// The cache covers the window between a webhook accepting a pool and the
/// store making it visible to the next LIST: two concurrently admitted pools
/// that only conflict with each other are still caught. The cache is local
/// to this validator instance, so admission must run as a singleton.
pub struct OverlapGuard {
    ttl: Duration,
    pending: Mutex<Vec<PendingPool>>,
}

impl Default for OverlapGuard {
    fn default() -> Self {
        Self::new(OVERLAP_GUARD_TTL)
    }
}

impl OverlapGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Checks `candidate` against `persisted` pools plus live cache entries.
    /// `old` names the pool being replaced on updates (`namespace/name`);
    /// that member is excluded from the comparison. On acceptance the
    /// candidate joins the cache until its entry expires.
    pub fn check(
        &self,
        persisted: &[IPPool],
        candidate: &IPPool,
        old: Option<&str>,
    ) -> Result<(), ValidationError> {
        let candidate_key = candidate.pool_key();
        let (Some(start), Some(end)) = (candidate.start_ip(), candidate.end_ip()) else {
            return Err(ValidationError::IncompleteRange);
        };
        let (start, end) = (u32::from(start), u32::from(end));

        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        pending.retain(|entry| now < entry.expires_at);

        for pool in persisted.iter().chain(pending.iter().map(|e| &e.pool)) {
            let key = pool.pool_key();
            if old == Some(key.as_str()) {
                continue;
            }
            let (Some(other_start), Some(other_end)) = (pool.start_ip(), pool.end_ip()) else {
                continue;
            };
            let (other_start, other_end) = (u32::from(other_start), u32::from(other_end));
            if start <= other_end && other_start <= end {
                return Err(ValidationError::Overlap {
                    candidate: candidate_key,
                    existing: key,
                    candidate_range: format!(
                        "{}-{}",
                        Ipv4Addr::from(start),
                        Ipv4Addr::from(end)
                    ),
                    existing_range: format!(
                        "{}-{}",
                        Ipv4Addr::from(other_start),
                        Ipv4Addr::from(other_end)
                    ),
                });
            }
        }

        pending.push(PendingPool {
            pool: candidate.clone(),
            expires_at: now + self.ttl,
        });
        Ok(())
    }

    /// Drops a cached entry, tombstoning a deleted pool so its range frees
    /// up without waiting for the TTL.
    pub fn forget(&self, key: &str) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.retain(|entry| entry.pool.pool_key() != key);
    }
}
