use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keeper_vcs::GitCli;

mod backup;
mod config;
mod console;
mod events;
mod session;
mod supervisor;
mod watch;

use backup::{scheduler, Coordinator};
use config::KeeperConfig;
use events::ServerEvent;
use session::SessionTracker;
use watch::WatchSet;

#[derive(Parser)]
#[command(name = "keeperd")]
#[command(about = "Supervises a Minecraft server and persists its world into git", long_about = None)]
struct Cli {
    /// Path to the keeper.toml configuration file
    #[arg(short, long, default_value = "keeper.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = KeeperConfig::load(&cli.config).await?;

    let repo_dir = config
        .server
        .working_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let git = GitCli::new(repo_dir, config.backup.git_timeout());
    if let Err(err) = git.preflight().await {
        error!("git preflight failed: {err}");
        error!("initialize the backup repository first: `git init`, `git remote add origin ...`, `git push -u origin <branch>`");
        std::process::exit(1);
    }

    let tracker = SessionTracker::new();
    let watch = WatchSet::from_config(&config.watch);

    info!("starting server: {} {:?}", config.server.command, config.server.args);
    let mut sup = supervisor::spawn(&config.server)?;
    let control = sup.control.clone();

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(git),
        watch,
        tracker.clone(),
        control.clone(),
        config.backup.clone(),
    ));
    coordinator.mark_backend_ready();

    // Server output feeds the classifier strictly in arrival order.
    {
        let tracker = tracker.clone();
        let coordinator = coordinator.clone();
        let mut output = sup.output;
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                match events::classify(&line) {
                    Some(ServerEvent::Ready) => coordinator.mark_service_ready(),
                    Some(ServerEvent::PlayerJoined(_)) => tracker.on_join(),
                    Some(ServerEvent::PlayerLeft(_)) => tracker.on_leave(),
                    None => {}
                }
            }
        });
    }

    tokio::spawn(scheduler::run_interval(
        coordinator.clone(),
        config.backup.interval(),
    ));
    tokio::spawn(scheduler::run_on_idle(coordinator.clone(), tracker.clone()));
    tokio::spawn(console::run(
        coordinator.clone(),
        tracker.clone(),
        control.clone(),
    ));
    info!(
        "automatic backups every {}m",
        config.backup.interval_secs / 60
    );

    let mut shutting_down = false;
    let exit_code = loop {
        tokio::select! {
            status = sup.child.wait() => {
                let status = status.context("Failed to wait on server process")?;
                warn!("server process exited: {status}");
                break status.code().unwrap_or(0);
            }
            _ = shutdown_signal(), if !shutting_down => {
                shutting_down = true;
                warn!("shutdown signal received, taking a final backup before stopping the server");
                coordinator.final_backup().await;
                control.send("stop");
            }
        }
    };

    std::process::exit(exit_code);
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
