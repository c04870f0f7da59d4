//! helmfirectl - Helmfile sync with live substitution and drift detection

use clap::Parser;
use helmfirectl::cli::Cli;
use helmfirectl::{commands, errors};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match commands::run(cli).await {
        Ok(()) => errors::EXIT_SUCCESS,
        Err(e) => errors::report(&e),
    };
    std::process::exit(code);
}
