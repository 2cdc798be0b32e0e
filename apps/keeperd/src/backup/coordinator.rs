//! The backup state machine: gating, mutual exclusion, stability waiting,
//! and the retried stage/commit/push transaction against the persistence
//! backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use keeper_vcs::{CommitOutcome, Vcs, VcsError};

use crate::config::BackupConfig;
use crate::session::SessionTracker;
use crate::supervisor::ControlHandle;
use crate::watch::WatchSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
    IdleReached,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ServiceNotReady,
    BackendNotReady,
    AlreadyInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The transaction went through. `stable` is false when the
    /// stability wait timed out and the snapshot was taken best-effort.
    Completed { retries: u32, stable: bool },
    Failed { attempts: u32 },
    /// Expected races (not ready yet, already running) absorbed as no-ops.
    Skipped(SkipReason),
}

pub struct Coordinator {
    vcs: Arc<dyn Vcs>,
    watch: WatchSet,
    tracker: SessionTracker,
    control: ControlHandle,
    config: BackupConfig,
    service_ready: AtomicBool,
    backend_ready: AtomicBool,
    in_progress: AtomicBool,
    /// Signaled whenever the in-progress flag is released.
    released: Notify,
    last_success: Mutex<Option<DateTime<Local>>>,
}

impl Coordinator {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        watch: WatchSet,
        tracker: SessionTracker,
        control: ControlHandle,
        config: BackupConfig,
    ) -> Self {
        Self {
            vcs,
            watch,
            tracker,
            control,
            config,
            service_ready: AtomicBool::new(false),
            backend_ready: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            released: Notify::new(),
            last_success: Mutex::new(None),
        }
    }

    /// Flips permanently on the first ready log line.
    pub fn mark_service_ready(&self) {
        if !self.service_ready.swap(true, Ordering::SeqCst) {
            info!("server is ready, backups enabled");
        }
    }

    /// Set once after the backend preflight succeeds at startup.
    pub fn mark_backend_ready(&self) {
        self.backend_ready.store(true, Ordering::SeqCst);
    }

    pub fn last_success(&self) -> Option<DateTime<Local>> {
        *self.last_success.lock().expect("last_success lock poisoned")
    }

    /// One best-effort backup bounded by the shutdown wait, used for the
    /// `stop` command and shutdown signals. If a backup is already in
    /// flight it is never aborted mid-transaction; instead this waits,
    /// bounded by the same budget, for that attempt to conclude so the
    /// caller only stops the server afterwards.
    pub async fn final_backup(&self) -> BackupOutcome {
        let budget = self.config.shutdown_wait();
        let outcome = self.backup(Trigger::Shutdown, true, Some(budget)).await;
        if outcome == BackupOutcome::Skipped(SkipReason::AlreadyInProgress) {
            info!("a backup is already in flight, letting it conclude before shutdown");
            if timeout(budget, self.in_progress_released()).await.is_err() {
                warn!("in-flight backup still running after {budget:?}, shutting down anyway");
            }
        }
        outcome
    }

    async fn in_progress_released(&self) {
        loop {
            let released = self.released.notified();
            if !self.in_progress.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    pub async fn backup(
        &self,
        trigger: Trigger,
        require_idle: bool,
        max_wait_override: Option<Duration>,
    ) -> BackupOutcome {
        if !self.service_ready.load(Ordering::SeqCst) {
            debug!(?trigger, "skipping backup, server not ready yet");
            return BackupOutcome::Skipped(SkipReason::ServiceNotReady);
        }
        if !self.backend_ready.load(Ordering::SeqCst) {
            warn!(?trigger, "skipping backup, persistence backend not ready");
            return BackupOutcome::Skipped(SkipReason::BackendNotReady);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?trigger, "skipping backup, another backup is in progress");
            return BackupOutcome::Skipped(SkipReason::AlreadyInProgress);
        }
        let _guard = InProgressGuard {
            flag: &self.in_progress,
            released: &self.released,
        };

        let started = Instant::now();
        info!(?trigger, "backup starting");
        self.control.say("Backing up the server...", "green");
        // Ask the server to flush buffered world data before we baseline
        // the watch-set, otherwise stability can predate unflushed writes.
        self.control.send("save-all flush");

        let mut stable = true;
        if require_idle {
            let max_wait = max_wait_override.unwrap_or(self.config.max_idle_wait());
            stable = self
                .watch
                .wait_for_stability(
                    &self.tracker,
                    max_wait,
                    self.config.stable(),
                    self.config.poll_interval(),
                )
                .await;
            if !stable {
                warn!(
                    ?trigger,
                    "watched files never settled within {max_wait:?}, taking a best-effort snapshot"
                );
            }
        }

        match self
            .vcs
            .recover_stale_lock(self.config.stale_lock_age())
            .await
        {
            Ok(true) => info!("cleared a stale working-tree lock from a previous run"),
            Ok(false) => {}
            Err(err) => warn!("stale lock check failed: {err}"),
        }

        let mut retries = 0u32;
        loop {
            match self.transact().await {
                Ok(outcome) => {
                    *self.last_success.lock().expect("last_success lock poisoned") =
                        Some(Local::now());
                    if outcome == CommitOutcome::NothingToCommit {
                        debug!(?trigger, "nothing changed since the last backup");
                    }
                    self.control.say("Server backup complete!", "green");
                    info!(
                        ?trigger,
                        retries,
                        elapsed = ?started.elapsed(),
                        "backup finished"
                    );
                    return BackupOutcome::Completed { retries, stable };
                }
                Err(err) => {
                    retries += 1;
                    if retries >= self.config.max_retries {
                        warn!(
                            ?trigger,
                            attempts = retries,
                            "backup failed, giving up until the next cycle: {err}"
                        );
                        self.control
                            .say("Server backup failed, check the logs.", "red");
                        return BackupOutcome::Failed { attempts: retries };
                    }
                    let delay = Duration::from_secs(1u64 << retries);
                    warn!(
                        ?trigger,
                        attempt = retries,
                        "backup transaction failed, retrying in {delay:?}: {err}"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// One stage/commit/push transaction, retried as a unit by the caller.
    async fn transact(&self) -> Result<CommitOutcome, VcsError> {
        self.vcs.stage_all().await?;
        let message = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let outcome = self.vcs.commit(&message).await?;
        // Push even on a clean tree: a previous push may have failed
        // after its commit landed.
        self.vcs.push().await?;
        Ok(outcome)
    }
}

/// Releases the mutual-exclusion flag on every exit path and wakes
/// anyone waiting for the transaction to conclude.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
    released: &'a Notify,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}
