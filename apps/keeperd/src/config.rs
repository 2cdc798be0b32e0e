use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable that starts the server, e.g. `java`.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory the server runs in. Defaults to the current directory,
    /// which is also the git working tree that receives backups.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// The watch-set the stability detector polls: individual files plus one
/// directory whose newest matching file stands in for the whole region set.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub region_dir: Option<PathBuf>,
    #[serde(default = "default_region_ext")]
    pub region_ext: String,
}

// Manual impl: a missing `[watch]` table goes through Default, which
// must agree with the field-level serde defaults above.
impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            region_dir: None,
            region_ext: default_region_ext(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub interval_secs: u64,
    pub stable_secs: u64,
    pub max_idle_wait_secs: u64,
    pub shutdown_wait_secs: u64,
    pub poll_interval_millis: u64,
    pub max_retries: u32,
    pub stale_lock_age_secs: u64,
    pub git_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            stable_secs: 10,
            max_idle_wait_secs: 120,
            shutdown_wait_secs: 30,
            poll_interval_millis: 1000,
            max_retries: 3,
            stale_lock_age_secs: 300,
            git_timeout_secs: 120,
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stable(&self) -> Duration {
        Duration::from_secs(self.stable_secs)
    }

    pub fn max_idle_wait(&self) -> Duration {
        Duration::from_secs(self.max_idle_wait_secs)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_age_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

impl KeeperConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }
}

fn default_region_ext() -> String {
    "mca".to_string()
}
