//! Engine error types
//!
//! Allocation paths are strict: anything unresolved after the retry budgets
//! surfaces here. Release paths are lenient and mostly swallow these,
//! logging instead (a missing pool on release means the work is already
//! done).

use crds::ValidationError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or pool data; the caller must correct its input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The named pool does not exist.
    #[error("ip pool {0} not found")]
    PoolNotFound(String),

    /// The selected pool has no assignable address left.
    #[error("no IP address available in pool {0}")]
    Exhausted(String),

    /// No pool in the namespace can serve an unqualified allocation.
    #[error("no IP address allocated in all pools")]
    AllPoolsExhausted,

    /// The find/update cycle ran out of retries without landing an address.
    #[error("find valid ip error in pool {0}")]
    FindFailed(String),

    /// The persisted cursor points past the end of the range; the pool
    /// shrank and the reconciler has not caught up yet.
    #[error("stale offset {offset} for pool {pool} of length {length}")]
    StaleCursor {
        pool: String,
        offset: i64,
        length: u64,
    },

    /// A requested static address lies outside the target pool.
    #[error("static ip {ip} is not in target pool {pool}")]
    StaticIpNotInPool { ip: String, pool: String },

    /// A requested static address is held by someone else.
    #[error("static ip {0} already in use")]
    StaticIpInUse(String),

    /// The address appeared in the pool between scan and write.
    #[error("ip address exist")]
    IpExists,

    /// The optimistic update loop exhausted its budget.
    #[error("update of pool {pool} failed after {attempts} attempts")]
    UpdateExhausted { pool: String, attempts: usize },

    /// An admission rule rejected the pool.
    #[error(transparent)]
    Admission(#[from] ValidationError),

    /// Any other store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
