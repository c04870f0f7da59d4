//! chart / image / list / remove: routed to the daemon when one is running.

use super::{absolute, Context};
use crate::cli::ListTarget;
use crate::output::{self, arrow};
use anyhow::{Context as _, Result};
use std::path::Path;

const LOCAL_HINT: &str =
    "No daemon running: this substitution only lives for this invocation. Start one with 'helmfirectl daemon start' or pass it to 'helmfirectl sync'.";

pub async fn add_chart(ctx: &Context, original: &str, local_path: &Path) -> Result<()> {
    if ctx.daemon_running() {
        let path = absolute(local_path)?;
        let path = path.to_string_lossy();
        ctx.client()?
            .add_chart(original, &path)
            .await
            .context("failed to add chart substitution to daemon")?;
        output::success(&format!(
            "Chart substitution added to daemon: {}",
            arrow(original, &path)
        ));
        return Ok(());
    }

    let resolved = ctx.registry.add_chart(original, local_path)?;
    output::success(&format!(
        "Chart substitution added: {}",
        arrow(original, &resolved.to_string_lossy())
    ));
    output::hint(LOCAL_HINT);
    Ok(())
}

pub async fn add_image(ctx: &Context, original: &str, replacement: &str) -> Result<()> {
    if ctx.daemon_running() {
        ctx.client()?
            .add_image(original, replacement)
            .await
            .context("failed to add image substitution to daemon")?;
        output::success(&format!(
            "Image substitution added to daemon: {}",
            arrow(original, replacement)
        ));
        return Ok(());
    }

    ctx.registry.add_image(original, replacement)?;
    output::success(&format!(
        "Image substitution added: {}",
        arrow(original, replacement)
    ));
    output::hint(LOCAL_HINT);
    Ok(())
}

pub async fn list(ctx: &Context, target: ListTarget) -> Result<()> {
    let substitutions = if ctx.daemon_running() {
        ctx.client()?
            .substitutions()
            .await
            .context("failed to fetch substitutions from daemon")?
    } else {
        ctx.registry.snapshot()
    };

    match target {
        ListTarget::Charts => output::print_charts(&substitutions.charts),
        ListTarget::Images => output::print_images(&substitutions.images),
        ListTarget::All => {
            output::print_charts(&substitutions.charts);
            println!();
            output::print_images(&substitutions.images);
        }
    }
    Ok(())
}

pub async fn remove_chart(ctx: &Context, original: &str) -> Result<()> {
    if ctx.daemon_running() {
        ctx.client()?
            .remove_chart(original)
            .await
            .context("failed to remove chart substitution from daemon")?;
    } else {
        ctx.registry.remove_chart(original)?;
    }
    output::success(&format!("Chart substitution removed: {}", original));
    Ok(())
}

pub async fn remove_image(ctx: &Context, original: &str) -> Result<()> {
    if ctx.daemon_running() {
        ctx.client()?
            .remove_image(original)
            .await
            .context("failed to remove image substitution from daemon")?;
    } else {
        ctx.registry.remove_image(original)?;
    }
    output::success(&format!("Image substitution removed: {}", original));
    Ok(())
}
