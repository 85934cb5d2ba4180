//! IPv4 address arithmetic
//!
//! Conversions between addresses and their 32-bit big-endian values, prefix
//! first/last queries, and the prefix set arithmetic the pool reconciler
//! uses to size the assignable set: summarize a range into a minimal CIDR
//! cover, subtract excluded prefixes by splitting, aggregate the residue.

use std::net::Ipv4Addr;

use ipnet::{Ipv4Net, Ipv4Subnets};

pub fn ipv4_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

pub fn u32_to_ipv4(n: u32) -> Ipv4Addr {
    Ipv4Addr::from(n)
}

/// Unsigned comparison: `a` strictly after `b`.
pub fn ip_after(a: Ipv4Addr, b: Ipv4Addr) -> bool {
    u32::from(a) > u32::from(b)
}

/// Network address of a prefix.
pub fn first_ip(net: Ipv4Net) -> Ipv4Addr {
    net.network()
}

/// Highest address of a prefix: network + 2^(32-prefix) - 1.
pub fn last_ip(net: Ipv4Net) -> Ipv4Addr {
    net.broadcast()
}

/// Number of addresses a prefix spans.
pub fn prefix_size(net: Ipv4Net) -> u64 {
    1u64 << (32 - net.prefix_len())
}

/// Minimal set of CIDRs covering the inclusive range `[start, end]`.
pub fn summarize(start: Ipv4Addr, end: Ipv4Addr) -> Vec<Ipv4Net> {
    if u32::from(start) > u32::from(end) {
        return Vec::new();
    }
    Ipv4Subnets::new(start, end, 0).collect()
}

/// Residue of `net` after removing `sub`, as whole prefixes.
///
/// When `sub` falls inside `net`, `net` is split one bit at a time; the half
/// not containing `sub` joins the residue and the other half is split again
/// until only `sub` remains.
pub fn exclude_prefix(net: Ipv4Net, sub: Ipv4Net) -> Vec<Ipv4Net> {
    let net = net.trunc();
    let sub = sub.trunc();
    if sub.contains(&net) {
        return Vec::new();
    }
    if !net.contains(&sub) {
        return vec![net];
    }

    let mut residue = Vec::new();
    let mut cur = net;
    while cur.prefix_len() < sub.prefix_len() {
        let Ok(halves) = cur.subnets(cur.prefix_len() + 1) else {
            break;
        };
        for half in halves {
            if half.contains(&sub) {
                cur = half;
            } else {
                residue.push(half);
            }
        }
    }
    residue
}

/// Subtracts every prefix in `excludes` from every prefix in `cover`,
/// aggregating the residue back into a minimal prefix set.
pub fn prefix_difference(cover: &[Ipv4Net], excludes: &[Ipv4Net]) -> Vec<Ipv4Net> {
    let mut residue = Vec::new();
    for net in cover {
        let mut current = vec![net.trunc()];
        for exclude in excludes {
            let mut next = Vec::new();
            for prefix in current {
                next.extend(exclude_prefix(prefix, *exclude));
            }
            current = next;
        }
        residue.extend(current);
    }
    Ipv4Net::aggregate(&residue)
}

/// Total number of addresses across a prefix set.
pub fn count_addresses(nets: &[Ipv4Net]) -> u64 {
    nets.iter().map(|net| prefix_size(*net)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn u32_round_trip() {
        let ip = addr("10.10.65.3");
        assert_eq!(ipv4_to_u32(ip), 0x0a0a_4103);
        assert_eq!(u32_to_ipv4(0x0a0a_4103), ip);
    }

    #[test]
    fn ordering_is_unsigned() {
        assert!(ip_after(addr("255.0.0.0"), addr("1.0.0.0")));
        assert!(!ip_after(addr("1.0.0.0"), addr("1.0.0.0")));
    }

    #[test]
    fn first_and_last_of_prefix() {
        let n = net("10.10.64.0/20");
        assert_eq!(first_ip(n), addr("10.10.64.0"));
        assert_eq!(last_ip(n), addr("10.10.79.255"));
        assert_eq!(prefix_size(n), 4096);

        let single = net("10.0.0.7/32");
        assert_eq!(first_ip(single), last_ip(single));
        assert_eq!(prefix_size(single), 1);
    }

    #[test]
    fn summarize_aligned_range() {
        assert_eq!(
            summarize(addr("10.0.0.0"), addr("10.0.0.255")),
            vec![net("10.0.0.0/24")]
        );
    }

    #[test]
    fn summarize_unaligned_range() {
        let cover = summarize(addr("10.0.0.1"), addr("10.0.0.6"));
        assert_eq!(
            cover,
            vec![
                net("10.0.0.1/32"),
                net("10.0.0.2/31"),
                net("10.0.0.4/31"),
                net("10.0.0.6/32"),
            ]
        );
        assert_eq!(count_addresses(&cover), 6);
    }

    #[test]
    fn summarize_empty_on_inverted_range() {
        assert!(summarize(addr("10.0.0.6"), addr("10.0.0.1")).is_empty());
    }

    #[test]
    fn exclude_prefix_splits_container() {
        let residue = exclude_prefix(net("10.0.0.0/24"), net("10.0.0.0/26"));
        assert_eq!(count_addresses(&residue), 256 - 64);
        assert!(residue.iter().all(|n| !n.contains(&addr("10.0.0.1"))));
        assert!(residue.iter().any(|n| n.contains(&addr("10.0.0.64"))));
    }

    #[test]
    fn exclude_prefix_disjoint_and_swallowing() {
        assert_eq!(
            exclude_prefix(net("10.0.0.0/24"), net("10.0.1.0/24")),
            vec![net("10.0.0.0/24")]
        );
        assert!(exclude_prefix(net("10.0.0.0/24"), net("10.0.0.0/16")).is_empty());
        assert!(exclude_prefix(net("10.0.0.0/24"), net("10.0.0.0/24")).is_empty());
    }

    #[test]
    fn difference_counts_reservations() {
        // a /29 pool minus its network, broadcast and gateway
        let cover = vec![net("12.10.64.0/29")];
        let excludes = vec![
            net("12.10.64.0/32"),
            net("12.10.64.7/32"),
            net("12.10.64.2/32"),
        ];
        let residue = prefix_difference(&cover, &excludes);
        assert_eq!(count_addresses(&residue), 5);
    }

    #[test]
    fn difference_handles_except_prefixes() {
        let cover = vec![net("10.0.0.0/24")];
        let excludes = vec![net("10.0.0.64/26"), net("10.0.0.200/32")];
        let residue = prefix_difference(&cover, &excludes);
        assert_eq!(count_addresses(&residue), 256 - 64 - 1);
    }

    #[test]
    fn difference_aggregates_residue() {
        // removing nothing collapses back to the original prefix
        let cover = vec![net("10.0.0.0/25"), net("10.0.0.128/25")];
        let residue = prefix_difference(&cover, &[]);
        assert_eq!(residue, vec![net("10.0.0.0/24")]);
    }
}
