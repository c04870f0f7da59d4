//! daemon subcommands

use super::Context;
use crate::output;
use anyhow::{Context as _, Result};
use helmfire_common::client::daemon_status;
use helmfired::args::DaemonArgs;
use helmfired::lockfile::{self, StopOutcome, StopPolicy};
use helmfired::{logging, Daemon};
use std::io::ErrorKind;

/// Run the daemon in this process until a signal or an API shutdown.
pub async fn start(ctx: &Context, args: DaemonArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    args.apply(&mut config)?;
    logging::init_file(&config.daemon.log_file, ctx.verbose)?;

    let daemon = Daemon::new(config);
    let addr = daemon.start().await.context("failed to start daemon")?;

    output::success(&format!(
        "Daemon started (PID {}), API on http://{}",
        std::process::id(),
        addr
    ));
    output::field("Logs", daemon.config().daemon.log_file.display());
    println!("Press Ctrl+C to stop");

    daemon.wait().await?;
    output::success("Daemon stopped");
    Ok(())
}

pub async fn stop(ctx: &Context) -> Result<()> {
    let path = ctx.config.daemon.pid_file.clone();
    let policy = StopPolicy {
        timeout: ctx.config.daemon.stop_timeout(),
        ..StopPolicy::default()
    };

    println!("Stopping daemon...");
    let outcome = tokio::task::spawn_blocking(move || lockfile::stop_daemon(&path, policy))
        .await
        .context("stop task panicked")??;

    match outcome {
        StopOutcome::Terminated(_) => output::success("Daemon stopped"),
        StopOutcome::Killed(pid) => output::success(&format!(
            "Daemon stopped (PID {} did not exit in time and was killed)",
            pid
        )),
        StopOutcome::Stale(pid) => output::hint(&format!(
            "Daemon was not running; removed stale lock for PID {}",
            pid
        )),
    }
    Ok(())
}

pub async fn status(ctx: &Context) -> Result<()> {
    let daemon = &ctx.config.daemon;
    let status = daemon_status(&daemon.pid_file, &daemon.api_addr, lockfile::is_running)
        .await
        .context("failed to get daemon status")?;
    output::print_status(&status);
    Ok(())
}

pub fn logs(ctx: &Context, lines: usize) -> Result<()> {
    let path = &ctx.config.daemon.log_file;
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read log file {}", path.display()))
        }
    };

    if content.trim().is_empty() {
        println!("No logs available");
        return Ok(());
    }
    for line in tail_lines(&content, lines) {
        println!("{}", line);
    }
    Ok(())
}

/// The last `n` lines of `content`; all of them when `n` is 0.
pub fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    if n == 0 || n >= all.len() {
        return all;
    }
    all[all.len() - n..].to_vec()
}

pub async fn reload(ctx: &Context) -> Result<()> {
    let response = ctx
        .require_daemon()?
        .reload()
        .await
        .context("failed to reload helmfile")?;
    output::success(&response.message);
    Ok(())
}

pub async fn drift(ctx: &Context) -> Result<()> {
    let summary = ctx
        .require_daemon()?
        .drift()
        .await
        .context("failed to get drift status")?;
    output::print_drift(&summary);
    Ok(())
}
