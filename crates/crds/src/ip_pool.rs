//! IPPool CRD
//!
//! Declares a range of IPv4 addresses the coordinator may hand out, together
//! with the occupancy table tracking who currently holds each address.
//!
//! The range takes one of two forms: a `cidr` prefix (optionally minus
//! `except` sub-prefixes), or an explicit `start`/`end` pair. Exactly one
//! form is present on a valid pool; the admission validator enforces this.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::allocate::AllocateInfo;

/// Cursor sentinel: every scannable address is occupied or reserved.
pub const OFFSET_FULL: i64 = -1;
/// Cursor sentinel passed to status updates that must not move the cursor
/// (static allocations). Never persisted.
pub const OFFSET_IGNORE: i64 = -2;
/// Cursor sentinel: restart scanning from the first position.
pub const OFFSET_RESET: i64 = -3;

/// Pod annotation naming the pool to allocate from.
pub const POOL_ANNOTATION: &str = "ipam.gridmesh.io/pool";
/// Pod annotation requesting a fixed address; only valid together with a
/// pool annotation.
pub const STATIC_IP_ANNOTATION: &str = "ipam.gridmesh.io/static-ip";
/// StatefulSet annotation carrying a comma-separated list of addresses its
/// members are pinned to.
pub const IP_LIST_ANNOTATION: &str = "ipam.gridmesh.io/ip-list";

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ipam.gridmesh.io",
    version = "v1alpha1",
    kind = "IPPool",
    namespaced,
    status = "IPPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolSpec {
    /// CIDR form of the pool range, e.g. `192.168.1.0/24`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,

    /// CIDR prefixes subtracted from the range; only valid with `cidr`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<Vec<String>>,

    /// First address of an explicit range; requires `end`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Last address of an explicit range; requires `start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    /// Enclosing L2 subnet; must contain the range endpoints and the gateway
    pub subnet: String,

    /// Gateway address inside `subnet`, not the subnet network address
    pub gateway: String,

    /// Private pools are skipped by unqualified allocations and only used
    /// when a request names them
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolStatus {
    /// Legacy occupancy map (address -> caller identity). Kept readable for
    /// records written by earlier releases; new allocations never land here.
    #[serde(
        default,
        rename = "usedips",
        skip_serializing_if = "Option::is_none"
    )]
    pub used_ips: Option<BTreeMap<String, String>>,

    /// Authoritative occupancy map (address -> allocation record)
    #[serde(
        default,
        rename = "allocatedips",
        skip_serializing_if = "Option::is_none"
    )]
    pub allocated_ips: Option<BTreeMap<String, AllocateInfo>>,

    /// Scan cursor, 0-based position inside the range. Negative values are
    /// sentinels: [`OFFSET_FULL`] and [`OFFSET_RESET`].
    #[serde(default)]
    pub offset: i64,

    /// Count of assignable addresses: range minus except list, subnet
    /// edges and gateway. Maintained by the pool reconciler.
    #[serde(default)]
    pub total_count: i64,

    /// `total_count` minus currently occupied addresses. Refreshed on every
    /// allocation mutation; best effort between reconciler passes.
    #[serde(default)]
    pub available_count: i64,
}

impl IPPool {
    /// First address of the pool range. `None` only on a malformed spec,
    /// which admission rejects before the pool is stored.
    pub fn start_ip(&self) -> Option<Ipv4Addr> {
        if let Some(start) = &self.spec.start {
            return start.parse().ok();
        }
        let cidr: Ipv4Net = self.spec.cidr.as_deref()?.parse().ok()?;
        Some(cidr.network())
    }

    /// Last address of the pool range.
    pub fn end_ip(&self) -> Option<Ipv4Addr> {
        if let Some(end) = &self.spec.end {
            return end.parse().ok();
        }
        let cidr: Ipv4Net = self.spec.cidr.as_deref()?.parse().ok()?;
        Some(cidr.broadcast())
    }

    /// Raw number of positions in the range. Reservations (gateway, subnet
    /// edges, except list) are not subtracted; the scan skips them and
    /// `total_count` reports the assignable set size.
    pub fn length(&self) -> u64 {
        if let Some(cidr) = &self.spec.cidr {
            let Ok(net) = cidr.parse::<Ipv4Net>() else {
                return 0;
            };
            return 1u64 << (32 - net.prefix_len());
        }
        match (self.start_ip(), self.end_ip()) {
            (Some(start), Some(end)) => {
                let (start, end) = (u32::from(start), u32::from(end));
                if end < start {
                    0
                } else {
                    u64::from(end - start) + 1
                }
            }
            _ => 0,
        }
    }

    /// Whether `ip` lies inside the range and outside every except prefix.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let (Some(start), Some(end)) = (self.start_ip(), self.end_ip()) else {
            return false;
        };
        let n = u32::from(ip);
        if n < u32::from(start) || n > u32::from(end) {
            return false;
        }
        for except in self.spec.except.as_deref().unwrap_or_default() {
            if let Ok(net) = except.parse::<Ipv4Net>() {
                if net.contains(&ip) {
                    return false;
                }
            }
        }
        true
    }

    /// `namespace/name` of this pool.
    pub fn pool_key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    pub fn offset(&self) -> i64 {
        self.status.as_ref().map(|s| s.offset).unwrap_or(0)
    }

    pub fn allocated_ips(&self) -> Option<&BTreeMap<String, AllocateInfo>> {
        self.status.as_ref()?.allocated_ips.as_ref()
    }

    pub fn used_ips(&self) -> Option<&BTreeMap<String, String>> {
        self.status.as_ref()?.used_ips.as_ref()
    }

    /// Number of occupied addresses across both occupancy maps. The maps are
    /// disjoint, so the sum is exact.
    pub fn occupied_count(&self) -> usize {
        self.allocated_ips().map(BTreeMap::len).unwrap_or(0)
            + self.used_ips().map(BTreeMap::len).unwrap_or(0)
    }

    /// Refreshes `available_count` from `total_count` and current occupancy.
    pub fn update_usage_counters(&mut self) {
        let occupied = self.occupied_count() as i64;
        let status = self.status.get_or_insert_with(Default::default);
        status.available_count = status.total_count - occupied;
    }
}
