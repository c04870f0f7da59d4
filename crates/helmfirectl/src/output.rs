//! Output formatting for helmfirectl

use helmfire_common::types::{ChartOverride, DaemonStatus, DriftSummary, ImageOverride};
use owo_colors::OwoColorize;

pub fn success(message: &str) {
    println!("{} {}", "✓".bright_green(), message);
}

pub fn failure(message: &str) {
    println!("{} {}", "✗".bright_red(), message);
}

pub fn hint(message: &str) {
    println!("{}", message.dimmed());
}

pub fn header(title: &str) {
    println!("{}", title.bold());
}

pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<14}{}", format!("{}:", label), value);
}

pub fn arrow(original: &str, target: &str) -> String {
    format!("{} → {}", original, target)
}

pub fn print_charts(charts: &[ChartOverride]) {
    if charts.is_empty() {
        println!("No chart substitutions active");
        return;
    }
    header("Active chart substitutions:");
    for chart in charts {
        println!("  {}", arrow(&chart.original, &chart.local_path.to_string_lossy()));
    }
}

pub fn print_images(images: &[ImageOverride]) {
    if images.is_empty() {
        println!("No image substitutions active");
        return;
    }
    header("Active image substitutions:");
    for image in images {
        println!("  {}", arrow(&image.original, &image.replacement));
    }
}

pub fn print_status(status: &DaemonStatus) {
    if !status.running {
        println!("Daemon: {}", "not running".yellow());
        return;
    }
    println!("Daemon: {}", "running".bright_green());
    if let Some(pid) = status.pid {
        field("PID", pid);
    }
    if let Some(uptime) = &status.uptime {
        field("Uptime", uptime);
    }
    if let Some(started) = &status.start_time {
        field("Started", started.to_rfc3339());
    }
    if let Some(last_sync) = &status.last_sync {
        field("Last sync", last_sync.to_rfc3339());
    }
    println!("  Active substitutions:");
    println!("    Charts: {}", status.active_substitutions.charts);
    println!("    Images: {}", status.active_substitutions.images);
}

pub fn print_drift(summary: &DriftSummary) {
    if !summary.enabled {
        println!("Drift detection: {}", "disabled".yellow());
        return;
    }
    let state = if summary.running {
        "running".bright_green().to_string()
    } else {
        "stopped".yellow().to_string()
    };
    println!("Drift detection: {}", state);
    field("Interval", format!("{}s", summary.interval_secs));
    field("Auto-heal", summary.auto_heal);
    field("Checks", summary.ticks);
    field("Drifted", summary.drift_detected);
    field("Healed", summary.healed);
    match &summary.last_check {
        Some(at) => field("Last check", at.to_rfc3339()),
        None => field("Last check", "never"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrow() {
        assert_eq!(arrow("bitnami/nginx", "./charts/nginx"), "bitnami/nginx → ./charts/nginx");
    }
}
