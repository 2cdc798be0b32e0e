use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::debug;

use super::coordinator::{Coordinator, Trigger};
use crate::session::SessionTracker;

/// Fires a backup once at startup and then on a fixed interval. Gating
/// and mutual exclusion live in the coordinator, so a timer firing while
/// a manual backup runs is simply dropped there.
pub async fn run_interval(coordinator: Arc<Coordinator>, interval: Duration) {
    coordinator.backup(Trigger::Startup, true, None).await;
    loop {
        sleep(interval).await;
        debug!("scheduled backup due");
        coordinator.backup(Trigger::Scheduled, true, None).await;
    }
}

/// Fires an opportunistic backup whenever the last player leaves.
pub async fn run_on_idle(coordinator: Arc<Coordinator>, tracker: SessionTracker) {
    loop {
        tracker.idle_reached().await;
        debug!("server went idle, taking an opportunistic backup");
        coordinator.backup(Trigger::IdleReached, true, None).await;
    }
}
