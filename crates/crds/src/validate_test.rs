//! Unit tests for pool validation and the overlap guard

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::allocate::AllocateInfo;
    use crate::ip_pool::{IPPool, IPPoolSpec, IPPoolStatus};
    use crate::validate::{validate_pool, OverlapGuard, ValidationError};

    fn pool(name: &str, cidr: &str, subnet: &str, gateway: &str) -> IPPool {
        IPPool {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: IPPoolSpec {
                cidr: Some(cidr.to_string()),
                except: None,
                start: None,
                end: None,
                subnet: subnet.to_string(),
                gateway: gateway.to_string(),
                private: false,
            },
            status: None,
        }
    }

    #[test]
    fn accepts_well_formed_cidr_pool() {
        let pool = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        assert!(validate_pool(&pool).is_ok());
    }

    #[test]
    fn accepts_well_formed_range_pool() {
        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.cidr = None;
        p.spec.start = Some("10.0.0.10".to_string());
        p.spec.end = Some("10.0.0.20".to_string());
        assert!(validate_pool(&p).is_ok());
    }

    #[test]
    fn rejects_bad_subnet_and_gateway() {
        let p = pool("pool1", "10.0.0.0/24", "not-a-cidr", "10.0.0.1");
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::InvalidSubnet(_))
        ));

        let p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "192.168.0.1");
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::GatewayUnusable { .. })
        ));

        // gateway equal to the subnet network address is reserved
        let p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.0");
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::GatewayUnusable { .. })
        ));
    }

    #[test]
    fn rejects_mixed_range_forms() {
        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.start = Some("10.0.0.10".to_string());
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::AmbiguousRange)
        ));

        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.cidr = None;
        p.spec.start = Some("10.0.0.10".to_string());
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::IncompleteRange)
        ));
    }

    #[test]
    fn rejects_inverted_range() {
        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.cidr = None;
        p.spec.start = Some("10.0.0.20".to_string());
        p.spec.end = Some("10.0.0.10".to_string());
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::InvertedRange { .. })
        ));
    }

    #[test]
    fn rejects_except_without_cidr() {
        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.cidr = None;
        p.spec.start = Some("10.0.0.10".to_string());
        p.spec.end = Some("10.0.0.20".to_string());
        p.spec.except = Some(vec!["10.0.0.12/32".to_string()]);
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::ExceptWithoutCidr)
        ));
    }

    #[test]
    fn rejects_malformed_except_entry() {
        let mut p = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        p.spec.except = Some(vec!["10.0.0.12".to_string()]);
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::InvalidExcept(_))
        ));
    }

    #[test]
    fn rejects_range_outside_subnet() {
        let p = pool("pool1", "10.1.0.0/24", "10.0.0.0/16", "10.0.0.1");
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::RangeOutsideSubnet { .. })
        ));
    }

    #[test]
    fn update_keeps_occupied_ips_inside_new_range() {
        let mut p = pool("pool1", "10.0.0.0/28", "10.0.0.0/16", "10.0.0.1");
        p.status = Some(IPPoolStatus {
            allocated_ips: Some(BTreeMap::from([(
                "10.0.0.100".to_string(),
                AllocateInfo::CniUsed {
                    id: "id".to_string(),
                },
            )])),
            ..Default::default()
        });
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::OccupiedOutsideRange(_))
        ));

        // the same record inside the range is fine
        let mut p = pool("pool1", "10.0.0.0/28", "10.0.0.0/16", "10.0.0.1");
        p.status = Some(IPPoolStatus {
            used_ips: Some(BTreeMap::from([(
                "10.0.0.5".to_string(),
                "legacy".to_string(),
            )])),
            ..Default::default()
        });
        assert!(validate_pool(&p).is_ok());

        // an occupied ip swallowed by a new except entry is refused too
        let mut p = pool("pool1", "10.0.0.0/28", "10.0.0.0/16", "10.0.0.1");
        p.spec.except = Some(vec!["10.0.0.4/30".to_string()]);
        p.status = Some(IPPoolStatus {
            used_ips: Some(BTreeMap::from([(
                "10.0.0.5".to_string(),
                "legacy".to_string(),
            )])),
            ..Default::default()
        });
        assert!(matches!(
            validate_pool(&p),
            Err(ValidationError::OccupiedOutsideRange(_))
        ));
    }

    #[test]
    fn guard_rejects_overlap_with_persisted_pool() {
        let guard = OverlapGuard::default();
        let persisted = vec![pool("pool1", "10.20.0.0/16", "10.0.0.0/8", "10.20.0.1")];
        let candidate = pool("pool2", "10.20.10.0/24", "10.0.0.0/8", "10.20.10.1");
        assert!(matches!(
            guard.check(&persisted, &candidate, None),
            Err(ValidationError::Overlap { .. })
        ));
    }

    #[test]
    fn guard_remembers_recent_admissions() {
        let guard = OverlapGuard::default();
        let persisted = vec![
            pool("pool1", "10.20.0.0/16", "10.0.0.0/8", "10.20.0.1"),
            pool("pool2", "10.30.0.0/16", "10.0.0.0/8", "10.30.0.1"),
            pool("pool3", "10.40.0.0/16", "10.0.0.0/8", "10.40.0.1"),
        ];

        let first = pool("pool4", "10.50.10.0/24", "10.0.0.0/8", "10.50.10.1");
        assert!(guard.check(&persisted, &first, None).is_ok());

        // The second candidate is disjoint from every persisted pool but
        // swallows the pool admitted a moment ago.
        let second = pool("pool5", "10.50.0.0/16", "10.0.0.0/8", "10.50.0.1");
        let err = guard.check(&persisted, &second, None).unwrap_err();
        match err {
            ValidationError::Overlap { existing, .. } => assert_eq!(existing, "ns1/pool4"),
            other => panic!("expected overlap, got {other}"),
        }
    }

    #[test]
    fn guard_excludes_the_pool_being_updated() {
        let guard = OverlapGuard::default();
        let persisted = vec![pool("pool1", "10.20.0.0/16", "10.0.0.0/8", "10.20.0.1")];

        // shrinking pool1 overlaps its own persisted record, which must not count
        let update = pool("pool1", "10.20.0.0/20", "10.0.0.0/8", "10.20.0.1");
        assert!(guard.check(&persisted, &update, Some("ns1/pool1")).is_ok());
    }

    #[test]
    fn guard_entries_expire() {
        let guard = OverlapGuard::new(Duration::from_millis(10));
        let first = pool("pool1", "10.50.10.0/24", "10.0.0.0/8", "10.50.10.1");
        assert!(guard.check(&[], &first, None).is_ok());

        std::thread::sleep(Duration::from_millis(20));

        let second = pool("pool2", "10.50.0.0/16", "10.0.0.0/8", "10.50.0.1");
        assert!(guard.check(&[], &second, None).is_ok());
    }

    #[test]
    fn guard_forget_tombstones_deletions() {
        let guard = OverlapGuard::default();
        let first = pool("pool1", "10.50.10.0/24", "10.0.0.0/8", "10.50.10.1");
        assert!(guard.check(&[], &first, None).is_ok());

        guard.forget("ns1/pool1");

        let second = pool("pool2", "10.50.0.0/16", "10.0.0.0/8", "10.50.0.1");
        assert!(guard.check(&[], &second, None).is_ok());
    }

    #[test]
    fn guard_detects_interval_overlap_between_range_pools() {
        let guard = OverlapGuard::default();
        let mut persisted = pool("pool1", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        persisted.spec.cidr = None;
        persisted.spec.start = Some("10.0.0.10".to_string());
        persisted.spec.end = Some("10.0.0.20".to_string());

        let mut candidate = pool("pool2", "10.0.0.0/24", "10.0.0.0/16", "10.0.0.1");
        candidate.spec.cidr = None;
        candidate.spec.start = Some("10.0.0.20".to_string());
        candidate.spec.end = Some("10.0.0.30".to_string());

        assert!(matches!(
            guard.check(&[persisted], &candidate, None),
            Err(ValidationError::Overlap { .. })
        ));
    }
}
