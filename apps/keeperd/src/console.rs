//! Line-oriented command console on the orchestrator's own stdin.
//! `backup`, `status` and `stop` are handled here; everything else is
//! forwarded verbatim to the server's control channel.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::backup::{Coordinator, Trigger};
use crate::session::SessionTracker;
use crate::supervisor::ControlHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Backup,
    Status,
    Stop,
    Forward(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed {
            "backup" => Self::Backup,
            "status" => Self::Status,
            "stop" => Self::Stop,
            _ => Self::Forward(trimmed.to_string()),
        })
    }
}

pub async fn run(coordinator: Arc<Coordinator>, tracker: SessionTracker, control: ControlHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("console ready: `backup`, `status`, `stop`; other input goes to the server");

    while let Ok(Some(line)) = lines.next_line().await {
        match ConsoleCommand::parse(&line) {
            Some(ConsoleCommand::Backup) => {
                // Manual backups do not wait for idleness.
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.backup(Trigger::Manual, false, None).await;
                });
            }
            Some(ConsoleCommand::Status) => {
                let last = coordinator
                    .last_success()
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                info!(sessions = tracker.active(), last_backup = %last, "status");
            }
            Some(ConsoleCommand::Stop) => {
                coordinator.final_backup().await;
                control.send("stop");
            }
            Some(ConsoleCommand::Forward(command)) => control.send(&command),
            None => {}
        }
    }
}
