//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap. Execution lives in `commands`.

use clap::{Args, Parser, Subcommand};
use helmfired::args::DaemonArgs;
use std::path::PathBuf;

/// Helmfile sync with live substitution and drift detection
#[derive(Parser, Debug)]
#[command(name = "helmfirectl")]
#[command(about = "Helmfile sync with watching, live substitution, and drift detection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to $HELMFIRE_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Address of a running daemon's control API
    #[arg(long, global = true, value_name = "ADDR")]
    pub daemon_api_addr: Option<String>,

    /// Lock file of a running daemon
    #[arg(long, global = true, value_name = "PATH")]
    pub daemon_pid_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize releases (like helmfile sync)
    Sync(SyncArgs),

    /// Substitute a chart with a local chart directory
    Chart {
        /// Chart reference as written in the helmfile (e.g. bitnami/postgresql)
        original: String,
        /// Directory containing Chart.yaml
        local_path: PathBuf,
    },

    /// Substitute a container image
    Image {
        original: String,
        replacement: String,
    },

    /// List active substitutions
    List {
        #[command(subcommand)]
        target: ListTarget,
    },

    /// Remove a substitution
    Remove {
        #[command(subcommand)]
        target: RemoveTarget,
    },

    /// Manage the helmfire daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonCommands,
    },
}

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Path to helmfile
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Environment name
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Label selectors (key=value[,key=value])
    #[arg(short = 'l', long = "selector", value_name = "SELECTOR")]
    pub selectors: Vec<String>,

    /// Default namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Kubernetes context
    #[arg(long, value_name = "CONTEXT")]
    pub kube_context: Option<String>,

    /// Simulate sync without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Chart substitution for this run (ORIGINAL=PATH)
    #[arg(long = "chart", value_name = "ORIGINAL=PATH")]
    pub charts: Vec<String>,

    /// Image substitution for this run (ORIGINAL=REPLACEMENT)
    #[arg(long = "image", value_name = "ORIGINAL=REPLACEMENT")]
    pub images: Vec<String>,

    /// Watch the helmfile and re-sync on change
    #[arg(short, long)]
    pub watch: bool,

    /// Keep running and check for drift after the sync
    #[arg(long)]
    pub drift_detect: bool,

    /// Drift check interval
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub drift_interval: String,

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

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTarget {
    /// Chart substitutions
    Charts,
    /// Image substitutions
    Images,
    /// Everything
    All,
}

#[derive(Subcommand, Debug)]
pub enum RemoveTarget {
    /// Remove a chart substitution
    Chart { original: String },
    /// Remove an image substitution
    Image { original: String },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground until stopped
    Start(DaemonArgs),

    /// Stop a running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Show daemon logs
    Logs {
        /// Number of trailing lines (0 = all)
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },

    /// Re-read the daemon's helmfile
    Reload,

    /// Show drift detection counters
    Drift,
}
