//! GridMesh IPAM Allocation Engine
//!
//! The authoritative IP allocator for the container platform. Pools live in
//! the cluster object store as `IPPool` resources; this crate arbitrates
//! allocation and release across concurrent requesters through optimistic
//! concurrency on the pool status.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ipam::{Ipam, KubeStore, NetConf};
//! use crds::AllocateType;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = Arc::new(KubeStore::new(client, "ipam-system"));
//! let ipam = Ipam::new(store, "ipam-system");
//!
//! let mut conf = NetConf::new(AllocateType::Pod);
//! conf.k8s_pod_ns = Some("default".to_string());
//! conf.k8s_pod_name = Some("web-0".to_string());
//! conf.allocate_identify = Some("sandbox-1".to_string());
//! conf.complete(ipam.store()).await?;
//!
//! let result = ipam.exec_add(&mut conf).await?;
//! println!("allocated {} via {}", result.address, result.gateway);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod engine;
pub mod error;
pub mod ip_math;
pub mod kube_store;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod net_conf;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use admission::PoolAdmission;
pub use engine::{AllocResult, Ipam, NextIp, Op, FIND_RETRY_COUNT};
pub use error::Error;
pub use kube_store::KubeStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStore;
pub use net_conf::NetConf;
pub use store::{update_pool_with, PoolStore, StoreError, UPDATE_RETRY_COUNT};
