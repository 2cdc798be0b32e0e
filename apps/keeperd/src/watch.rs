//! Filesystem stability detection.
//!
//! The server keeps writing world data for a while after the last player
//! leaves, so a zero-session signal alone is not enough to snapshot
//! safely. The detector polls a fixed watch-set and treats consecutive
//! identical `(size, mtime)` snapshots as the proxy for "the writer has
//! finished flushing".

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::config::WatchConfig;
use crate::session::SessionTracker;

/// Sentinel for a path that does not exist, distinguishable from any
/// real file.
const MISSING: (i64, i64) = (-1, -1);

pub type Snapshot = BTreeMap<String, (i64, i64)>;

#[derive(Clone)]
pub struct WatchSet {
    files: Vec<PathBuf>,
    region_dir: Option<PathBuf>,
    region_ext: String,
}

impl WatchSet {
    pub fn new(
        files: Vec<PathBuf>,
        region_dir: Option<PathBuf>,
        region_ext: impl Into<String>,
    ) -> Self {
        Self {
            files,
            region_dir,
            region_ext: region_ext.into(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            config.files.clone(),
            config.region_dir.clone(),
            config.region_ext.clone(),
        )
    }

    /// One point-in-time observation of the whole watch-set. The region
    /// directory collapses to a single synthetic entry holding the newest
    /// matching file's `(size, mtime)`.
    pub fn snapshot(&self) -> Snapshot {
        let mut snap = BTreeMap::new();
        for path in &self.files {
            snap.insert(path.display().to_string(), stat_entry(path));
        }
        if let Some(dir) = &self.region_dir {
            let key = format!("{}/*.{}", dir.display(), self.region_ext);
            snap.insert(key, self.newest_region_entry(dir));
        }
        snap
    }

    fn newest_region_entry(&self, dir: &Path) -> (i64, i64) {
        let Ok(entries) = fs::read_dir(dir) else {
            return MISSING;
        };
        let mut newest = MISSING;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(self.region_ext.as_str()) {
                continue;
            }
            let stat = stat_entry(&path);
            if stat.1 > newest.1 {
                newest = stat;
            }
        }
        newest
    }

    /// Polls until the watch-set has been unchanged for
    /// `required_stable` while no sessions are active, or `max_wait`
    /// elapses. Active sessions and observed changes both reset the
    /// stability clock and refresh the baseline.
    pub async fn wait_for_stability(
        &self,
        tracker: &SessionTracker,
        max_wait: Duration,
        required_stable: Duration,
        poll: Duration,
    ) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut baseline = self.snapshot();
        let mut unchanged_since = Instant::now();

        loop {
            if Instant::now() >= deadline {
                debug!("stability wait timed out after {max_wait:?}");
                return false;
            }
            sleep(poll).await;

            if !tracker.is_idle() {
                // Active writers invalidate any accumulated stability.
                baseline = self.snapshot();
                unchanged_since = Instant::now();
                continue;
            }

            let current = self.snapshot();
            if current == baseline {
                if unchanged_since.elapsed() >= required_stable {
                    debug!("watch-set stable for {required_stable:?}");
                    return true;
                }
            } else {
                baseline = current;
                unchanged_since = Instant::now();
            }
        }
    }
}

fn stat_entry(path: &Path) -> (i64, i64) {
    match fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(-1);
            (meta.len() as i64, mtime)
        }
        Err(_) => MISSING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_files_use_the_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("does-not-exist.dat");
        let set = WatchSet::new(vec![ghost.clone()], None, "mca");

        let snap = set.snapshot();
        assert_eq!(snap.get(&ghost.display().to_string()), Some(&MISSING));
    }

    #[test]
    fn region_aggregate_tracks_only_matching_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a region").unwrap();
        let set = WatchSet::new(vec![], Some(dir.path().to_path_buf()), "mca");

        let key = format!("{}/*.mca", dir.path().display());
        assert_eq!(set.snapshot().get(&key), Some(&MISSING));

        std::fs::write(dir.path().join("r.0.0.mca"), b"region data").unwrap();
        let entry = *set.snapshot().get(&key).unwrap();
        assert_ne!(entry, MISSING);
        assert_eq!(entry.0, b"region data".len() as i64);
    }

    #[test]
    fn snapshots_compare_equal_iff_entries_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("level.dat");
        std::fs::write(&file, b"abc").unwrap();
        let set = WatchSet::new(vec![file.clone()], None, "mca");

        let before = set.snapshot();
        assert_eq!(before, set.snapshot());

        let mut handle = std::fs::OpenOptions::new().append(true).open(&file).unwrap();
        handle.write_all(b"def").unwrap();
        handle.flush().unwrap();
        assert_ne!(before, set.snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_watch_set_reaches_stability_early() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("level.dat");
        std::fs::write(&file, b"steady").unwrap();
        let set = WatchSet::new(vec![file], None, "mca");
        let tracker = SessionTracker::new();

        let start = Instant::now();
        let stable = set
            .wait_for_stability(
                &tracker,
                Duration::from_secs(30),
                Duration::from_secs(2),
                Duration::from_secs(1),
            )
            .await;
        assert!(stable);
        // Early exit: well before the 30s budget.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn active_sessions_prevent_stability() {
        let dir = tempfile::tempdir().unwrap();
        let set = WatchSet::new(vec![dir.path().join("level.dat")], None, "mca");
        let tracker = SessionTracker::new();
        tracker.on_join();

        let stable = set
            .wait_for_stability(
                &tracker,
                Duration::from_secs(5),
                Duration::from_secs(2),
                Duration::from_secs(1),
            )
            .await;
        assert!(!stable);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_mid_wait_restarts_the_stability_clock() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("level.dat");
        std::fs::write(&file, b"steady").unwrap();
        let set = WatchSet::new(vec![file], None, "mca");
        let tracker = SessionTracker::new();
        tracker.on_join();

        // Goes idle at 1.5s, a player rejoins at 2.5s, idle again at 3.5s.
        let driver = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(1500)).await;
                tracker.on_leave();
                sleep(Duration::from_millis(1000)).await;
                tracker.on_join();
                sleep(Duration::from_millis(1000)).await;
                tracker.on_leave();
            })
        };

        let start = Instant::now();
        let stable = set
            .wait_for_stability(
                &tracker,
                Duration::from_secs(20),
                Duration::from_secs(3),
                Duration::from_secs(1),
            )
            .await;
        assert!(stable);
        // The rejoin at 2.5s invalidated the stability accumulated since
        // the first idle stretch: success comes from a fresh baseline
        // after 3.5s, never before the 6s mark. Without the reset the
        // wait would have ended at ~4s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
        driver.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ongoing_writes_prevent_stability() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("level.dat");
        std::fs::write(&file, b"start").unwrap();
        let set = WatchSet::new(vec![file.clone()], None, "mca");
        let tracker = SessionTracker::new();

        // A writer that keeps appending between polls.
        let writer = tokio::spawn(async move {
            for _ in 0..10 {
                sleep(Duration::from_millis(500)).await;
                let mut handle = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&file)
                    .unwrap();
                handle.write_all(b"more").unwrap();
                sleep(Duration::from_millis(500)).await;
            }
        });

        let stable = set
            .wait_for_stability(
                &tracker,
                Duration::from_secs(6),
                Duration::from_secs(3),
                Duration::from_secs(1),
            )
            .await;
        assert!(!stable);
        writer.abort();
    }
}
