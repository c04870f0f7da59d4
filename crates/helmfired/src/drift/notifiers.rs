//! Drift notification sinks
//!
//! Supports:
//! - Console (framed block on stdout plus a structured log event)
//! - Webhook (JSON POST, bounded timeout, no retry)
//! - File (JSON Lines, append only)

use super::report::DriftReport;
use helmfire_common::config::DriftConfig;
use helmfire_common::{HelmfireError, Result};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const SEPARATOR: &str = "═══════════════════════════════════════════════════";

/// A sink for drift reports
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, report: &DriftReport) -> Result<()>;
}

/// Writes a human-readable block per report.
pub struct ConsoleNotifier {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleNotifier {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    fn notify(&self, report: &DriftReport) -> Result<()> {
        let block = format_report(report);
        {
            let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
            out.write_all(block.as_bytes())?;
            out.flush()?;
        }

        warn!(
            release = %report.unit_name,
            namespace = %report.namespace,
            drift_type = %report.drift_type,
            severity = %report.severity,
            healed = report.healed,
            "drift detected"
        );
        Ok(())
    }
}

fn format_report(report: &DriftReport) -> String {
    let icon = if report.healed { "✅" } else { "⚠️" };
    let mut block = format!(
        "\n{icon} DRIFT DETECTED {icon}\n\
         Timestamp:    {}\n\
         Release:      {}\n\
         Namespace:    {}\n\
         Type:         {}\n\
         Severity:     {}\n\
         Details:      {}\n",
        report.timestamp.to_rfc3339(),
        report.unit_name,
        report.namespace,
        report.drift_type,
        report.severity,
        report.details,
    );
    if report.healed {
        block.push_str("Status:       Auto-healed\n");
    }
    block.push_str(&format!("\nDiff:\n{}\n{}\n\n", report.raw_diff, SEPARATOR));
    block
}

/// POSTs each report as JSON.
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn notify(&self, report: &DriftReport) -> Result<()> {
        let payload = serde_json::to_vec(report)?;

        // The blocking client owns a runtime, so it lives only for this call.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| HelmfireError::Transport(format!("failed to build webhook client: {}", e)))?;

        let response = client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .map_err(|e| HelmfireError::Transport(format!("failed to send webhook: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HelmfireError::Transport(format!(
                "webhook returned non-success status: {}",
                status.as_u16()
            )));
        }

        debug!(url = %self.url, release = %report.unit_name, "webhook notification sent");
        Ok(())
    }
}

/// Appends each report as one JSON line.
pub struct FileNotifier {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileNotifier {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }
}

impl Notifier for FileNotifier {
    fn name(&self) -> &str {
        "file"
    }

    fn notify(&self, report: &DriftReport) -> Result<()> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Console first, then the webhook and report file if configured.
pub fn build_notifiers(config: &DriftConfig) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(ConsoleNotifier::stdout())];
    if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        notifiers.push(Arc::new(WebhookNotifier::new(url, config.webhook_timeout())));
    }
    if let Some(path) = &config.report_file {
        notifiers.push(Arc::new(FileNotifier::new(path)));
    }
    notifiers
}
