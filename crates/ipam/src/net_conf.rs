//! Allocation request envelope
//!
//! A [`NetConf`] is the normalized form of one CNI ADD/DEL invocation.
//! [`NetConf::complete`] resolves the pool and address the consumer asked
//! for through its annotations (or those of its owning stateful workload);
//! [`NetConf::valid`] checks the envelope carries everything its kind
//! requires before the engine acts on it.

use std::net::Ipv4Addr;

use crds::{
    object_key, AllocateInfo, AllocateType, IP_LIST_ANNOTATION, POOL_ANNOTATION,
    STATIC_IP_ANNOTATION,
};
use tracing::warn;

use crate::error::Error;
use crate::store::PoolStore;

pub const KIND_STATEFUL_SET: &str = "StatefulSet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConf {
    pub kind: AllocateType,
    /// Pool to allocate from; resolved by `complete` when absent.
    pub pool: Option<String>,
    /// Static address request; resolved by `complete` when absent.
    pub ip: Option<String>,
    /// Caller-issued sandbox identity (container id for CNI invocations).
    pub allocate_identify: Option<String>,
    pub k8s_pod_name: Option<String>,
    pub k8s_pod_ns: Option<String>,
    /// `ownerNs/ownerName` of the stateful workload behind a pinned request.
    pub owner: Option<String>,
}

impl NetConf {
    pub fn new(kind: AllocateType) -> Self {
        Self {
            kind,
            pool: None,
            ip: None,
            allocate_identify: None,
            k8s_pod_name: None,
            k8s_pod_ns: None,
            owner: None,
        }
    }

    /// Resolves pool and address defaults from the consumer's annotations.
    ///
    /// Only pod requests without an explicit pool are completed. A static-ip
    /// annotation without a pool annotation is refused. A pod owned by a
    /// stateful workload inherits the workload's pool, and when the workload
    /// pins an ip-list the request is reclassified as a stateful-set
    /// allocation with one list member picked for this pod.
    pub async fn complete(&mut self, store: &dyn PoolStore) -> Result<(), Error> {
        if self.kind != AllocateType::Pod || self.pool.is_some() {
            return Ok(());
        }

        let (Some(ns), Some(name)) = (self.k8s_pod_ns.clone(), self.k8s_pod_name.clone()) else {
            return Err(Error::Validation(format!(
                "must set K8sPodNs and K8sPodName for type {}",
                AllocateType::Pod
            )));
        };

        let pod = store.get_pod(&ns, &name).await?;
        let annotations = pod.metadata.annotations.unwrap_or_default();
        if let Some(pool) = annotations.get(POOL_ANNOTATION) {
            self.pool = Some(pool.clone());
        }
        if let Some(ip) = annotations.get(STATIC_IP_ANNOTATION) {
            if self.pool.is_none() {
                return Err(Error::Validation(
                    "can't only specify static IP but no pool".to_string(),
                ));
            }
            self.ip = Some(ip.clone());
        }
        if self.pool.is_some() {
            return Ok(());
        }

        let owner = pod
            .metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.kind == KIND_STATEFUL_SET);
        if let Some(owner) = owner {
            self.complete_by_stateful_set(store, &ns, &owner.name).await?;
        }

        Ok(())
    }

    async fn complete_by_stateful_set(
        &mut self,
        store: &dyn PoolStore,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let set = store.get_stateful_set(namespace, name).await?;
        let annotations = set.metadata.annotations.unwrap_or_default();
        if let Some(pool) = annotations.get(POOL_ANNOTATION) {
            self.pool = Some(pool.clone());
        }

        let Some(ip_list) = annotations.get(IP_LIST_ANNOTATION) else {
            return Ok(());
        };
        let Some(pool_name) = self.pool.clone() else {
            return Err(Error::Validation(
                "can't only specify IP list but no pool".to_string(),
            ));
        };

        self.kind = AllocateType::StatefulSet;
        self.owner = Some(object_key(namespace, name));

        let pool = store
            .get_pool(&pool_name)
            .await
            .map_err(|e| match e.is_not_found() {
                true => Error::PoolNotFound(pool_name.clone()),
                false => Error::Store(e),
            })?;
        let me = self.allocate_info();

        let mut unused = None;
        for entry in ip_list.split(',') {
            let entry = entry.trim();
            let Ok(ip) = entry.parse::<Ipv4Addr>() else {
                warn!("invalid ip {} in ip-list of statefulset {}/{}", entry, namespace, name);
                continue;
            };
            let key = ip.to_string();
            if !pool.contains(ip) {
                warn!(
                    "ip {} in ip-list of statefulset {}/{} is not in pool {}",
                    key, namespace, name, pool_name
                );
                continue;
            }
            if pool.used_ips().is_some_and(|m| m.contains_key(&key)) {
                continue;
            }
            if let Some(existing) = pool.allocated_ips().and_then(|m| m.get(&key)) {
                if existing.same_identity(&me) {
                    self.ip = Some(key);
                    return Ok(());
                }
                continue;
            }
            if unused.is_none() {
                unused = Some(key);
            }
        }

        match unused {
            Some(ip) => {
                self.ip = Some(ip);
                Ok(())
            }
            None => Err(Error::Validation(format!(
                "no valid or unallocated ip in statefulset {}/{} ip list",
                namespace, name
            ))),
        }
    }

    /// Checks the envelope carries the fields its kind requires.
    pub fn valid(&self) -> Result<(), Error> {
        let missing = |field: &str| {
            Error::Validation(format!("type {} must set {}", self.kind, field))
        };

        if matches!(self.kind, AllocateType::CniUsed | AllocateType::Pod)
            && self.allocate_identify.as_deref().unwrap_or_default().is_empty()
        {
            return Err(missing("AllocateIdentify"));
        }

        if matches!(self.kind, AllocateType::Pod | AllocateType::StatefulSet)
            && (self.k8s_pod_ns.as_deref().unwrap_or_default().is_empty()
                || self.k8s_pod_name.as_deref().unwrap_or_default().is_empty())
        {
            return Err(missing("K8sPodNs and K8sPodName"));
        }

        if self.kind == AllocateType::StatefulSet {
            if self.owner.as_deref().unwrap_or_default().is_empty() {
                return Err(missing("Owner"));
            }
            if self.pool.as_deref().unwrap_or_default().is_empty()
                || self.ip.as_deref().unwrap_or_default().is_empty()
            {
                return Err(missing("Pool and IP"));
            }
        }

        Ok(())
    }

    /// Identity the allocation is recorded under: `podNs/podName` for pod
    /// and stateful-set requests, the caller identity otherwise.
    pub fn allocate_id(&self) -> String {
        match self.kind {
            AllocateType::Pod | AllocateType::StatefulSet => object_key(
                self.k8s_pod_ns.as_deref().unwrap_or_default(),
                self.k8s_pod_name.as_deref().unwrap_or_default(),
            ),
            AllocateType::CniUsed => self.allocate_identify.clone().unwrap_or_default(),
        }
    }

    /// Allocation record this request would write.
    pub fn allocate_info(&self) -> AllocateInfo {
        match self.kind {
            AllocateType::Pod => AllocateInfo::Pod {
                id: self.allocate_id(),
                cid: self.allocate_identify.clone().unwrap_or_default(),
            },
            AllocateType::CniUsed => AllocateInfo::CniUsed {
                id: self.allocate_id(),
            },
            AllocateType::StatefulSet => AllocateInfo::StatefulSet {
                id: self.allocate_id(),
                owner: self.owner.clone().unwrap_or_default(),
            },
        }
    }

    pub(crate) fn pod_str(&self) -> String {
        object_key(
            self.k8s_pod_ns.as_deref().unwrap_or_default(),
            self.k8s_pod_name.as_deref().unwrap_or_default(),
        )
    }
}
