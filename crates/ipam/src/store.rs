//! Object-store contract
//!
//! The engine never talks to the cluster directly; it goes through
//! [`PoolStore`], which captures exactly the operations the allocator,
//! reaper and admission paths need. The production implementation is
//! [`crate::KubeStore`]; tests use the in-memory mock.
//!
//! Status updates carry the record's resource version; a write against a
//! stale version fails with [`StoreError::Conflict`] and the caller is
//! expected to re-read and retry. [`update_pool_with`] packages that
//! read-mutate-write discipline with a bounded budget so every mutation
//! path shares one loop.

use async_trait::async_trait;
use crds::IPPool;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::Error;

/// Attempts per optimistic status update.
pub const UPDATE_RETRY_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The record's resource version changed since it was read.
    #[error("conflict updating {0}")]
    Conflict(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// The slice of the cluster object store the coordinator depends on.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Fetches a pool from the coordinator's namespace.
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError>;

    /// Lists every pool in the coordinator's namespace, in store order.
    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError>;

    /// Writes a pool's status under optimistic concurrency and returns the
    /// stored record.
    async fn update_pool_status(&self, pool: &IPPool) -> Result<IPPool, StoreError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, StoreError>;

    async fn get_stateful_set(&self, namespace: &str, name: &str)
        -> Result<StatefulSet, StoreError>;
}

/// Read-mutate-write loop against a pool's status.
///
/// `mutate` returns `Ok(true)` to request a write, `Ok(false)` when the pool
/// already reflects the desired state (no write happens and the current
/// record is returned). Version conflicts and transient store failures are
/// retried up to [`UPDATE_RETRY_COUNT`] times; a missing pool and mutate
/// errors surface immediately.
pub async fn update_pool_with<F>(
    store: &dyn PoolStore,
    name: &str,
    mut mutate: F,
) -> Result<IPPool, Error>
where
    F: FnMut(&mut IPPool) -> Result<bool, Error> + Send,
{
    for attempt in 1..=UPDATE_RETRY_COUNT {
        let mut pool = match store.get_pool(name).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => return Err(Error::Store(e)),
            Err(e) => {
                warn!("failed to get ip pool {} (attempt {}): {}", name, attempt, e);
                continue;
            }
        };

        if !mutate(&mut pool)? {
            return Ok(pool);
        }

        match store.update_pool_status(&pool).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!("conflict updating ip pool {} (attempt {}), retrying", name, attempt);
            }
            Err(e) => {
                warn!("failed to update ip pool {} status (attempt {}): {}", name, attempt, e);
            }
        }
    }

    Err(Error::UpdateExhausted {
        pool: name.to_string(),
        attempts: UPDATE_RETRY_COUNT,
    })
}
