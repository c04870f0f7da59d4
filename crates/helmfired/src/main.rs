//! helmfired - runs the helmfire daemon in the foreground for service managers.

use anyhow::{Context, Result};
use clap::Parser;
use helmfire_common::config::HelmfireConfig;
use helmfired::args::DaemonArgs;
use helmfired::{logging, supervisor};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "helmfired", version, about = "helmfire daemon")]
struct Cli {
    /// Config file (defaults to $HELMFIRE_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,

    #[command(flatten)]
    daemon: DaemonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HelmfireConfig::load(cli.config.as_deref()).context("failed to load config")?;
    cli.daemon.apply(&mut config)?;

    if cli.log_stderr {
        logging::init_stderr(cli.verbose)?;
    } else {
        logging::init_file(&config.daemon.log_file, cli.verbose)?;
    }

    info!("helmfired v{} starting", helmfire_common::VERSION);
    supervisor::run(config).await?;
    Ok(())
}
