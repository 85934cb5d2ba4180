//! GridMesh IPAM Controller
//!
//! Keeps the pool table honest while the allocation engine serves traffic:
//! - IPPool watcher: resets the scan cursor and recomputes counters after a
//!   pool's range changes
//! - StatefulSet watcher: releases pinned addresses when their owning
//!   workload is deleted
//! - Stale-IP reaper: periodic sweep removing allocations whose consumers
//!   have vanished

mod controller;
mod error;
mod reaper;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use std::env;
use std::time::Duration;

use controller::Controller;
use tracing::info;

use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting GridMesh IPAM controller");

    let namespace = env::var("WATCH_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let reap_period = env::var("REAP_PERIOD_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(reaper::DEFAULT_REAP_PERIOD);

    info!("Configuration:");
    info!("  Pool namespace: {}", namespace);
    info!("  Reap period: {:?}", reap_period);

    let controller = Controller::new(namespace, reap_period).await?;
    controller.run().await
}
