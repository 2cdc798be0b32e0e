//! Child process lifecycle and stdio plumbing for the supervised server.
//!
//! Each stdio stream gets its own task: stdout lines are echoed untouched
//! and forwarded, in order, over a channel to the event pump; stderr is
//! echoed; a writer task feeds console lines into the child's stdin.

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::ServerConfig;

/// Cloneable handle that delivers one line at a time to the server's
/// control channel (its stdin). Lines are newline-terminated by the
/// writer task, so callers never send partial lines.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl ControlHandle {
    pub fn send(&self, line: &str) {
        if self.tx.send(line.to_string()).is_err() {
            warn!("server control channel closed, dropping command: {line}");
        }
    }

    /// Broadcast a chat message to all connected players.
    pub fn say(&self, text: &str, color: &str) {
        self.send(&format!(
            r#"tellraw @a {{"text":"{text}","color":"{color}"}}"#
        ));
    }

    #[cfg(test)]
    pub fn for_tests() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

pub struct Supervisor {
    pub child: Child,
    pub control: ControlHandle,
    /// Ordered stream of the server's stdout lines.
    pub output: mpsc::UnboundedReceiver<String>,
}

pub fn spawn(config: &ServerConfig) -> Result<Supervisor> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn server process `{}`", config.command))?;

    let stdout = child.stdout.take().context("server stdout not captured")?;
    let stderr = child.stderr.take().context("server stderr not captured")?;
    let mut stdin = child.stdin.take().context("server stdin not captured")?;

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            println!("{line}");
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("{line}");
        }
    });

    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = control_rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    Ok(Supervisor {
        child,
        control: ControlHandle { tx: control_tx },
        output: line_rx,
    })
}
