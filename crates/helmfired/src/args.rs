//! Daemon start flags, shared with `helmfirectl daemon start`.

use clap::Args;
use helmfire_common::config::HelmfireConfig;
use helmfire_common::durations::{interval_secs, parse_duration};
use helmfire_common::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Args)]
pub struct DaemonArgs {
    /// Control API listen address
    #[arg(long, value_name = "ADDR")]
    pub api_addr: Option<String>,

    /// PID lock file
    #[arg(long, value_name = "PATH")]
    pub pid_file: Option<PathBuf>,

    /// Daemon log file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Helmfile to manage
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub helmfile: Option<PathBuf>,

    /// Helmfile environment
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Drift check interval (e.g. 30s, 5m, 1h); enables drift detection
    #[arg(long, value_name = "DURATION")]
    pub drift_interval: Option<String>,

    /// Redeploy releases that drifted
    #[arg(long)]
    pub drift_auto_heal: bool,

    /// Webhook receiving drift reports
    #[arg(long, value_name = "URL")]
    pub drift_webhook: Option<String>,

    /// JSON Lines file receiving drift reports
    #[arg(long, value_name = "PATH")]
    pub drift_file: Option<PathBuf>,
}

impl DaemonArgs {
    /// Override `config` with the flags that were given.
    pub fn apply(&self, config: &mut HelmfireConfig) -> Result<()> {
        if let Some(addr) = &self.api_addr {
            config.daemon.api_addr = addr.clone();
        }
        if let Some(path) = &self.pid_file {
            config.daemon.pid_file = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.daemon.log_file = path.clone();
        }
        if let Some(path) = &self.helmfile {
            config.helmfile.path = path.clone();
        }
        if let Some(env) = &self.environment {
            config.helmfile.environment = env.clone();
        }
        if let Some(interval) = &self.drift_interval {
            config.drift.interval_secs = interval_secs(parse_duration(interval)?);
        }
        if self.drift_auto_heal {
            config.drift.auto_heal = true;
        }
        if let Some(url) = &self.drift_webhook {
            config.drift.webhook_url = Some(url.clone());
        }
        if let Some(path) = &self.drift_file {
            config.drift.report_file = Some(path.clone());
        }
        config.daemon.socket_addr()?;
        Ok(())
    }
}
