//! Controller-specific error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Allocation engine error
    #[error("IPAM error: {0}")]
    Ipam(#[from] ipam::Error),

    /// Object store error
    #[error("store error: {0}")]
    Store(#[from] ipam::StoreError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A deleted workload's addresses could not all be released
    #[error("failed to release addresses of deleted StatefulSet {0}")]
    ReleaseFailed(String),

    /// Resource watch failed
    #[error("resource watch failed: {0}")]
    Watch(String),
}
