//! Test helpers for the controller's unit tests

use crds::{IPPool, IPPoolSpec, IPPoolStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const TEST_NAMESPACE: &str = "ipam-system";

pub fn test_pool(name: &str, cidr: &str, subnet: &str, gateway: &str) -> IPPool {
    IPPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
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
        status: Some(IPPoolStatus::default()),
    }
}

pub fn test_pod(ns: &str, name: &str, pod_ip: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            pod_ip: pod_ip.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn test_sts(ns: &str, name: &str) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}
