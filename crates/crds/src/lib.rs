//! GridMesh IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the GridMesh IPAM coordinator:
//! - `ip_pool`: the IPPool resource (address range, reservations, occupancy)
//! - `allocate`: allocation ownership records stored in pool status
//! - `validate`: admission-time pool validation and the overlap guard

pub mod allocate;
pub mod ip_pool;
pub mod validate;

#[cfg(test)]
mod validate_test;

// Re-exports
pub use allocate::*;
pub use ip_pool::*;
pub use validate::*;
