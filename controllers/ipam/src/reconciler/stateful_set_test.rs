//! Unit tests for the StatefulSet reconciler

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crds::{AllocateInfo, IPPoolStatus, OFFSET_FULL, OFFSET_RESET};
    use ipam::{MockStore, PoolStore};

    use crate::reconciler::Reconciler;
    use crate::test_utils::*;

    fn reconciler(store: &Arc<MockStore>) -> Reconciler {
        Reconciler::new(store.clone() as Arc<dyn PoolStore>)
    }

    fn pinned(id: &str, owner: &str) -> AllocateInfo {
        AllocateInfo::StatefulSet {
            id: id.to_string(),
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn living_workload_keeps_its_addresses() {
        let store = Arc::new(MockStore::new());
        store.add_stateful_set(test_sts("ns1", "web"));
        let mut pool = test_pool("pool1", "10.0.0.0/28", "10.0.0.0/24", "10.0.0.14");
        pool.status = Some(IPPoolStatus {
            allocated_ips: Some(
                [("10.0.0.1".to_string(), pinned("ns1/web-0", "ns1/web"))].into(),
            ),
            ..Default::default()
        });
        store.add_pool(pool);

        reconciler(&store)
            .reconcile_stateful_set(&test_sts("ns1", "web"))
            .await
            .unwrap();

        let status = store.pool_snapshot("pool1").unwrap().status.unwrap();
        assert_eq!(status.allocated_ips.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleted_workload_is_released_across_pools() {
        let store = Arc::new(MockStore::new());

        let mut pool_a = test_pool("pool-a", "10.0.1.0/28", "10.0.0.0/16", "10.0.0.1");
        pool_a.status = Some(IPPoolStatus {
            offset: OFFSET_FULL,
            allocated_ips: Some(
                [
                    ("10.0.1.1".to_string(), pinned("ns1/web-0", "ns1/web")),
                    ("10.0.1.2".to_string(), pinned("ns1/web-1", "ns1/web")),
                    // another workload's pin stays
                    ("10.0.1.3".to_string(), pinned("ns1/db-0", "ns1/db")),
                    // pod allocations are not this reconciler's business
                    (
                        "10.0.1.4".to_string(),
                        AllocateInfo::Pod {
                            id: "ns1/web-9".to_string(),
                            cid: "cid".to_string(),
                        },
                    ),
                ]
                .into(),
            ),
            ..Default::default()
        });
        store.add_pool(pool_a);

        let mut pool_b = test_pool("pool-b", "10.0.2.0/28", "10.0.0.0/16", "10.0.0.1");
        pool_b.status = Some(IPPoolStatus {
            allocated_ips: Some(
                [("10.0.2.1".to_string(), pinned("ns1/web-2", "ns1/web"))].into(),
            ),
            ..Default::default()
        });
        store.add_pool(pool_b);

        // the workload is absent from the store
        reconciler(&store)
            .reconcile_stateful_set(&test_sts("ns1", "web"))
            .await
            .unwrap();

        let status_a = store.pool_snapshot("pool-a").unwrap().status.unwrap();
        let allocated_a = status_a.allocated_ips.unwrap();
        assert_eq!(allocated_a.len(), 2);
        assert!(allocated_a.contains_key("10.0.1.3"));
        assert!(allocated_a.contains_key("10.0.1.4"));
        assert_eq!(status_a.offset, OFFSET_RESET);

        let status_b = store.pool_snapshot("pool-b").unwrap().status.unwrap();
        assert_eq!(status_b.allocated_ips.unwrap_or_default().len(), 0);
    }

    #[tokio::test]
    async fn pools_without_pins_are_untouched() {
        let store = Arc::new(MockStore::new());
        let pool = test_pool("pool1", "10.0.0.0/28", "10.0.0.0/24", "10.0.0.14");
        store.add_pool(pool);
        let version = store
            .pool_snapshot("pool1")
            .unwrap()
            .metadata
            .resource_version;

        reconciler(&store)
            .reconcile_stateful_set(&test_sts("ns1", "gone"))
            .await
            .unwrap();

        assert_eq!(
            store.pool_snapshot("pool1").unwrap().metadata.resource_version,
            version
        );
    }
}
