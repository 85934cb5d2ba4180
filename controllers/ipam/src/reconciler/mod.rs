//! Reconciliation logic for the IPAM controller.
//!
//! - `ip_pool`: cursor reset and counter recomputation after range changes
//! - `stateful_set`: release of pinned addresses when a workload disappears

pub mod ip_pool;
pub mod stateful_set;
#[cfg(test)]
mod stateful_set_test;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crds::IPPool;
use ipam::PoolStore;

/// The spec fields whose change invalidates the scan cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeKey {
    cidr: Option<String>,
    start: Option<String>,
    end: Option<String>,
    // set equality: reordering the except list is not a change
    except: BTreeSet<String>,
}

impl RangeKey {
    pub(crate) fn of(pool: &IPPool) -> Self {
        Self {
            cidr: pool.spec.cidr.clone(),
            start: pool.spec.start.clone(),
            end: pool.spec.end.clone(),
            except: pool
                .spec
                .except
                .as_deref()
                .unwrap_or_default()
                .iter()
                .cloned()
                .collect(),
        }
    }
}

/// Reconciles IPAM resources against the pool store.
pub struct Reconciler {
    pub(crate) store: Arc<dyn PoolStore>,
    /// Last range observed per pool. Watch events that leave the range
    /// untouched (allocation status churn) must not reset the cursor; a
    /// restart reconciles every pool once, like the original create replay.
    seen_ranges: Mutex<HashMap<String, RangeKey>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PoolStore>) -> Self {
        Self {
            store,
            seen_ranges: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn seen_ranges(&self) -> MutexGuard<'_, HashMap<String, RangeKey>> {
        match self.seen_ranges.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
