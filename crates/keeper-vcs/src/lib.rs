//! Persistence-backend capability for keeperd.
//!
//! The backup coordinator only ever talks to the [`Vcs`] trait, so a
//! different version-control system (or a plain archival copy) can be
//! substituted without touching the coordinator's state machine. The
//! shipped implementation is [`GitCli`], which shells out to the `git`
//! command-line tool.

use std::time::Duration;

use async_trait::async_trait;

mod errors;
mod git;

pub use errors::VcsError;
pub use git::GitCli;

/// Result of a commit attempt. A commit that finds nothing staged is a
/// soft success, not an error, so quiet intervals don't produce noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeStatus {
    Clean,
    Dirty,
}

#[async_trait]
pub trait Vcs: Send + Sync {
    /// Stage every change in the working tree.
    async fn stage_all(&self) -> Result<(), VcsError>;

    /// Commit staged changes with the given message.
    async fn commit(&self, message: &str) -> Result<CommitOutcome, VcsError>;

    /// Push the current branch to its configured upstream.
    async fn push(&self) -> Result<(), VcsError>;

    /// Whether the working tree has uncommitted changes.
    async fn status(&self) -> Result<WorktreeStatus, VcsError>;

    /// Verify a remote with an upstream tracking branch is configured.
    async fn check_remote_configured(&self) -> Result<(), VcsError>;

    /// Clear an exclusive working-tree lock left behind by a crashed
    /// prior run, but only if it is older than `max_age` and no live
    /// process still holds it. Returns true if a lock was removed.
    async fn recover_stale_lock(&self, max_age: Duration) -> Result<bool, VcsError>;
}
