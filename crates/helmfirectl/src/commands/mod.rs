//! Command handlers for helmfirectl

pub mod daemon;
pub mod substitute;
pub mod sync;

use crate::cli::{Cli, Commands, DaemonCommands, RemoveTarget};
use anyhow::{Context as _, Result};
use helmfire_common::client::DaemonClient;
use helmfire_common::config::HelmfireConfig;
use helmfire_common::{HelmfireError, SubstitutionRegistry};
use helmfired::{lockfile, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Settings and state shared by every command of one invocation.
pub struct Context {
    pub config: HelmfireConfig,
    pub verbose: bool,
    /// Overrides made without a daemon live here for this process only.
    pub registry: Arc<SubstitutionRegistry>,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config =
            HelmfireConfig::load(cli.config.as_deref()).context("failed to load config")?;
        if let Some(addr) = &cli.daemon_api_addr {
            config.daemon.api_addr = addr.clone();
        }
        if let Some(path) = &cli.daemon_pid_file {
            config.daemon.pid_file = path.clone();
        }
        Ok(Self::new(config, cli.verbose))
    }

    pub fn new(config: HelmfireConfig, verbose: bool) -> Self {
        Self {
            config,
            verbose,
            registry: Arc::new(SubstitutionRegistry::new()),
        }
    }

    /// Whether the lock file names a live daemon. Unreadable locks count as no daemon.
    pub fn daemon_running(&self) -> bool {
        match lockfile::is_running(&self.config.daemon.pid_file) {
            Ok(running) => running,
            Err(e) => {
                debug!(error = %e, "cannot determine daemon state");
                false
            }
        }
    }

    pub fn client(&self) -> Result<DaemonClient> {
        Ok(DaemonClient::new(&self.config.daemon.api_addr)?)
    }

    /// Client for a daemon that must already be running.
    pub fn require_daemon(&self) -> Result<DaemonClient> {
        if !self.daemon_running() {
            return Err(HelmfireError::NotRunning("helmfire daemon".to_string()).into());
        }
        self.client()
    }
}

/// Absolute form of `path`, so the daemon resolves it independent of our cwd.
pub(crate) fn absolute(path: &std::path::Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(path))
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::from_cli(&cli)?;

    // The foreground daemon logs to its log file instead.
    if !matches!(
        cli.command,
        Commands::Daemon {
            action: DaemonCommands::Start(_)
        }
    ) {
        logging::init_stderr(ctx.verbose)?;
    }

    match cli.command {
        Commands::Sync(args) => sync::run(&ctx, args).await,
        Commands::Chart {
            original,
            local_path,
        } => substitute::add_chart(&ctx, &original, &local_path).await,
        Commands::Image {
            original,
            replacement,
        } => substitute::add_image(&ctx, &original, &replacement).await,
        Commands::List { target } => substitute::list(&ctx, target).await,
        Commands::Remove { target } => match target {
            RemoveTarget::Chart { original } => substitute::remove_chart(&ctx, &original).await,
            RemoveTarget::Image { original } => substitute::remove_image(&ctx, &original).await,
        },
        Commands::Daemon { action } => match action {
            DaemonCommands::Start(args) => daemon::start(&ctx, args).await,
            DaemonCommands::Stop => daemon::stop(&ctx).await,
            DaemonCommands::Status => daemon::status(&ctx).await,
            DaemonCommands::Logs { lines } => daemon::logs(&ctx, lines),
            DaemonCommands::Reload => daemon::reload(&ctx).await,
            DaemonCommands::Drift => daemon::drift(&ctx).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        let mut config = HelmfireConfig::default();
        config.daemon.pid_file = dir.path().join("helmfire.pid");
        Context::new(config, false)
    }

    #[test]
    fn test_no_lock_means_no_daemon() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(!ctx.daemon_running());
        let err = ctx.require_daemon().unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn test_garbage_lock_means_no_daemon() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        std::fs::write(&ctx.config.daemon.pid_file, "not a pid").unwrap();
        assert!(!ctx.daemon_running());
    }

    #[test]
    fn test_absolute() {
        assert_eq!(
            absolute(std::path::Path::new("/charts/nginx")).unwrap(),
            PathBuf::from("/charts/nginx")
        );
        let relative = absolute(std::path::Path::new("charts/nginx")).unwrap();
        assert!(relative.is_absolute());
        assert!(relative.ends_with("charts/nginx"));
    }
}
