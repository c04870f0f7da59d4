//! Configuration for helmfire.
//!
//! Loaded from `--config`, then `$HELMFIRE_CONFIG`, otherwise defaults.
//! Command-line flags override whatever the file says.

use crate::error::{HelmfireError, Result};
use crate::helm::HelmSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "HELMFIRE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelmfireConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub helmfile: HelmfileConfig,
    #[serde(default)]
    pub helm: HelmConfig,
    #[serde(default)]
    pub drift: DriftConfig,
}

/// Daemon process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Lock file holding the daemon PID
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Control API listen address
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// How long in-flight API requests get to finish on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// How long `daemon stop` waits after SIGTERM before SIGKILL
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/helmfire.pid")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/helmfire.log")
}

fn default_api_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_stop_timeout() -> u64 {
    3
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            api_addr: default_api_addr(),
            shutdown_grace_secs: default_shutdown_grace(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl DaemonConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.api_addr.parse().map_err(|e| {
            HelmfireError::InvalidConfig(format!("invalid api_addr '{}': {}", self.api_addr, e))
        })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmfileConfig {
    #[serde(default = "default_helmfile_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub environment: String,
}

fn default_helmfile_path() -> PathBuf {
    PathBuf::from("helmfile.yaml")
}

impl Default for HelmfileConfig {
    fn default() -> Self {
        Self {
            path: default_helmfile_path(),
            environment: String::new(),
        }
    }
}

/// Helm CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmConfig {
    #[serde(default = "default_helm_binary")]
    pub binary: String,

    /// Namespace for releases that do not set one
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub kube_context: String,

    /// Upper bound on a single helm invocation
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: default_helm_binary(),
            namespace: String::new(),
            kube_context: String::new(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl HelmConfig {
    pub fn settings(&self) -> HelmSettings {
        HelmSettings {
            binary: self.binary.clone(),
            namespace: self.namespace.clone(),
            kube_context: self.kube_context.clone(),
            timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

/// Drift detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Seconds between checks; 0 disables drift detection
    #[serde(default)]
    pub interval_secs: u64,

    #[serde(default)]
    pub auto_heal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// JSON Lines file receiving every report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<PathBuf>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            auto_heal: false,
            webhook_url: None,
            report_file: None,
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

impl DriftConfig {
    pub fn enabled(&self) -> bool {
        self.interval_secs > 0
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

impl HelmfireConfig {
    /// Load from an explicit path, `$HELMFIRE_CONFIG`, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load_from(Path::new(&path)),
            _ => {
                debug!("no config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HelmfireError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)?;
        info!(file = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.daemon.socket_addr()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HelmfireConfig::default();
        assert_eq!(config.daemon.pid_file, PathBuf::from("/tmp/helmfire.pid"));
        assert_eq!(config.daemon.api_addr, "127.0.0.1:8080");
        assert_eq!(config.daemon.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.helm.binary, "helm");
        assert!(!config.drift.enabled());
        assert_eq!(config.drift.webhook_timeout_secs, 10);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = HelmfireConfig::parse(
            r#"
[daemon]
api_addr = "0.0.0.0:9090"

[drift]
interval_secs = 300
auto_heal = true
webhook_url = "https://hooks.example.com/drift"
"#,
        )
        .unwrap();

        assert_eq!(config.daemon.api_addr, "0.0.0.0:9090");
        assert_eq!(config.daemon.log_file, PathBuf::from("/tmp/helmfire.log"));
        assert_eq!(config.drift.interval(), Duration::from_secs(300));
        assert!(config.drift.auto_heal);
        assert_eq!(config.helmfile.path, PathBuf::from("helmfile.yaml"));
    }

    #[test]
    fn test_rejects_bad_addr() {
        let err = HelmfireConfig::parse("[daemon]\napi_addr = \"nowhere\"\n").unwrap_err();
        assert!(matches!(err, HelmfireError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("helmfire.toml");
        fs::write(&path, "[helm]\nnamespace = \"apps\"\ncommand_timeout_secs = 60\n").unwrap();

        let config = HelmfireConfig::load(Some(&path)).unwrap();
        let settings = config.helm.settings();
        assert_eq!(settings.namespace, "apps");
        assert_eq!(settings.timeout, Duration::from_secs(60));

        assert!(HelmfireConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
