use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::VcsError;
use crate::{CommitOutcome, Vcs, WorktreeStatus};

/// Git backend driven through the `git` command-line tool. Every
/// invocation runs against the configured working tree and carries a
/// timeout so a wedged remote cannot hang the caller forever.
pub struct GitCli {
    worktree: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(worktree: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            worktree: worktree.into(),
            timeout,
        }
    }

    /// One-time startup check that the working tree can actually receive
    /// backups: it is a git repository, has an `origin` remote, and the
    /// current branch tracks an upstream.
    pub async fn preflight(&self) -> Result<(), VcsError> {
        if self.run(&["rev-parse", "--is-inside-work-tree"]).await.is_err() {
            return Err(VcsError::NotConfigured(
                "not a git working tree (run `git init`)",
            ));
        }
        self.check_remote_configured().await
    }

    async fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let rendered = args.join(" ");
        debug!("git {rendered}");

        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.worktree).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|err| VcsError::io("spawning git", err))?,
            Err(_) => {
                return Err(VcsError::Timeout {
                    args: rendered,
                    timeout: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(VcsError::Command {
                args: rendered,
                status: output.status.to_string(),
                stdout,
                stderr,
            });
        }

        if !stdout.is_empty() {
            debug!("git {}: {stdout}", args[0]);
        }
        Ok(stdout)
    }

    fn index_lock_path(&self) -> PathBuf {
        self.worktree.join(".git").join("index.lock")
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn stage_all(&self) -> Result<(), VcsError> {
        self.run(&["add", "-A"]).await.map(|_| ())
    }

    async fn commit(&self, message: &str) -> Result<CommitOutcome, VcsError> {
        if self.status().await? == WorktreeStatus::Clean {
            debug!("working tree clean, skipping commit");
            return Ok(CommitOutcome::NothingToCommit);
        }
        self.run(&["commit", "-m", message]).await?;
        Ok(CommitOutcome::Committed)
    }

    async fn push(&self) -> Result<(), VcsError> {
        self.run(&["push"]).await.map(|_| ())
    }

    async fn status(&self) -> Result<WorktreeStatus, VcsError> {
        let porcelain = self.run(&["status", "--porcelain"]).await?;
        if worktree_dirty(&porcelain) {
            Ok(WorktreeStatus::Dirty)
        } else {
            Ok(WorktreeStatus::Clean)
        }
    }

    async fn check_remote_configured(&self) -> Result<(), VcsError> {
        if self.run(&["remote", "get-url", "origin"]).await.is_err() {
            return Err(VcsError::NotConfigured(
                "no `origin` remote (run `git remote add origin ...`)",
            ));
        }
        if self
            .run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"])
            .await
            .is_err()
        {
            return Err(VcsError::NotConfigured(
                "no upstream tracking branch (run `git push -u origin <branch>`)",
            ));
        }
        Ok(())
    }

    async fn recover_stale_lock(&self, max_age: Duration) -> Result<bool, VcsError> {
        let path = self.index_lock_path();
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(VcsError::io("inspecting index.lock", err)),
        };

        let modified = meta
            .modified()
            .map_err(|err| VcsError::io("reading index.lock mtime", err))?;
        if !lock_is_stale(modified, SystemTime::now(), max_age) {
            debug!("index.lock present but recent, leaving it alone");
            return Ok(false);
        }

        // Age alone is not proof of a crash; make sure no live process
        // holds the lock before clearing it.
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| VcsError::io("opening index.lock", err))?;
        if file.try_lock_exclusive().is_err() {
            warn!("index.lock is old but still held by a live process, leaving it alone");
            return Ok(false);
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|err| VcsError::io("removing stale index.lock", err))?;
        info!("removed stale index.lock at {}", path.display());
        Ok(true)
    }
}

fn worktree_dirty(porcelain: &str) -> bool {
    porcelain.lines().any(|line| !line.trim().is_empty())
}

fn lock_is_stale(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > max_age,
        // Lock mtime in the future means a clock jump; treat as fresh.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_output_classifies_dirtiness() {
        assert!(!worktree_dirty(""));
        assert!(!worktree_dirty("\n  \n"));
        assert!(worktree_dirty(" M world/level.dat"));
        assert!(worktree_dirty("?? world/region/r.0.0.mca"));
    }

    #[test]
    fn lock_staleness_respects_threshold() {
        let now = SystemTime::now();
        let threshold = Duration::from_secs(300);

        let old = now - Duration::from_secs(600);
        assert!(lock_is_stale(old, now, threshold));

        let recent = now - Duration::from_secs(10);
        assert!(!lock_is_stale(recent, now, threshold));

        let future = now + Duration::from_secs(60);
        assert!(!lock_is_stale(future, now, threshold));
    }

    #[tokio::test]
    async fn missing_lock_file_is_not_recovered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let git = GitCli::new(dir.path(), Duration::from_secs(5));
        let cleared = git
            .recover_stale_lock(Duration::from_secs(300))
            .await
            .unwrap();
        assert!(!cleared);
    }

    #[tokio::test]
    async fn fresh_lock_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        let lock = git_dir.join("index.lock");
        std::fs::write(&lock, b"").unwrap();

        let git = GitCli::new(dir.path(), Duration::from_secs(5));
        let cleared = git
            .recover_stale_lock(Duration::from_secs(300))
            .await
            .unwrap();
        assert!(!cleared);
        assert!(lock.exists());
    }
}
