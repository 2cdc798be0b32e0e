use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

/// Counts active player sessions, fed exclusively by classified log
/// events. Reaching zero wakes anyone waiting in [`idle_reached`], which
/// the orchestrator uses to fire an opportunistic backup.
///
/// [`idle_reached`]: SessionTracker::idle_reached
#[derive(Clone, Default)]
pub struct SessionTracker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicU32,
    idle: Notify,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_join(&self) {
        let now = self.inner.count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sessions = now, "player joined");
    }

    pub fn on_leave(&self) {
        let result = self
            .inner
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(1) => {
                debug!(sessions = 0, "last player left, server is idle");
                self.inner.idle.notify_waiters();
            }
            Ok(prev) => debug!(sessions = prev - 1, "player left"),
            Err(_) => warn!("leave event with zero active sessions, ignoring"),
        }
    }

    pub fn active(&self) -> u32 {
        self.inner.count.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }

    /// Resolves the next time the session count drops to zero.
    pub async fn idle_reached(&self) {
        self.inner.idle.notified().await;
    }
}
