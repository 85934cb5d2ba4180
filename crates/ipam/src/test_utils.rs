//! Test helpers for building pools, consumers and request envelopes

use std::collections::BTreeMap;

use crds::{AllocateType, IPPool, IPPoolSpec, IPPoolStatus};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::net_conf::NetConf;

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

pub fn pod_conf(ns: &str, name: &str, sandbox: &str) -> NetConf {
    let mut conf = NetConf::new(AllocateType::Pod);
    conf.k8s_pod_ns = Some(ns.to_string());
    conf.k8s_pod_name = Some(name.to_string());
    conf.allocate_identify = Some(sandbox.to_string());
    conf
}

pub fn cni_conf(identify: &str) -> NetConf {
    let mut conf = NetConf::new(AllocateType::CniUsed);
    conf.allocate_identify = Some(identify.to_string());
    conf
}

pub fn sts_conf(pool: &str, ip: &str, ns: &str, name: &str, owner: &str) -> NetConf {
    let mut conf = NetConf::new(AllocateType::StatefulSet);
    conf.pool = Some(pool.to_string());
    conf.ip = Some(ip.to_string());
    conf.k8s_pod_ns = Some(ns.to_string());
    conf.k8s_pod_name = Some(name.to_string());
    conf.owner = Some(owner.to_string());
    conf
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

pub fn annotated_pod(
    ns: &str,
    name: &str,
    annotations: &[(&str, &str)],
    owner_sts: Option<&str>,
) -> Pod {
    let mut pod = test_pod(ns, name, None);
    pod.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    if let Some(owner) = owner_sts {
        pod.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "StatefulSet".to_string(),
            name: owner.to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        }]);
    }
    pod
}

pub fn annotated_sts(ns: &str, name: &str, annotations: &[(&str, &str)]) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}
