//! Shared fixtures for daemon integration tests.

#![allow(dead_code)]

use helmfire_common::config::HelmfireConfig;
use helmfire_common::helm::{DeployMode, UnitDeployer, UnitDiffer};
use helmfire_common::{HelmfireError, ManagedUnit, Result};
use helmfired::drift::{DriftReport, Notifier};
use helmfired::process::{ProcessHandle, ProcessTable};
use helmfired::Daemon;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const HELMFILE: &str = r#"
releases:
  - name: nginx
    namespace: web
    chart: bitnami/nginx
  - name: redis
    chart: bitnami/redis
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub config: HelmfireConfig,
    pub differ: Arc<ScriptedDiffer>,
    pub deployer: Arc<RecordingDeployer>,
    pub notifier: Arc<RecordingNotifier>,
    pub processes: Arc<FakeProcessTable>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let helmfile = dir.path().join("helmfile.yaml");
        std::fs::write(&helmfile, HELMFILE).unwrap();

        let mut config = HelmfireConfig::default();
        config.daemon.pid_file = dir.path().join("helmfire.pid");
        config.daemon.log_file = dir.path().join("helmfire.log");
        config.daemon.api_addr = "127.0.0.1:0".to_string();
        config.daemon.shutdown_grace_secs = 1;
        config.helmfile.path = helmfile;

        Self {
            dir,
            config,
            differ: Arc::new(ScriptedDiffer::default()),
            deployer: Arc::new(RecordingDeployer::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            processes: Arc::new(FakeProcessTable::default()),
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config.daemon.pid_file.clone()
    }

    pub fn daemon(&self) -> Daemon {
        Daemon::new(self.config.clone())
            .with_process_table(self.processes.clone())
            .with_collaborators(self.differ.clone(), self.deployer.clone())
            .with_notifier(self.notifier.clone())
            .with_signal_handlers(false)
    }
}

/// Diff output per release name; unknown releases have no drift.
#[derive(Default)]
pub struct ScriptedDiffer {
    pub diffs: Mutex<HashMap<String, String>>,
}

impl ScriptedDiffer {
    pub fn set(&self, name: &str, diff: &str) {
        self.diffs
            .lock()
            .unwrap()
            .insert(name.to_string(), diff.to_string());
    }
}

impl UnitDiffer for ScriptedDiffer {
    fn diff(&self, unit: &ManagedUnit) -> Result<String> {
        Ok(self
            .diffs
            .lock()
            .unwrap()
            .get(&unit.name)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingDeployer {
    pub calls: Mutex<Vec<(String, DeployMode)>>,
    pub failing: Mutex<HashSet<String>>,
}

impl RecordingDeployer {
    pub fn calls(&self) -> Vec<(String, DeployMode)> {
        self.calls.lock().unwrap().clone()
    }
}

impl UnitDeployer for RecordingDeployer {
    fn deploy(&self, unit: &ManagedUnit, mode: DeployMode) -> Result<()> {
        self.calls.lock().unwrap().push((unit.name.clone(), mode));
        if self.failing.lock().unwrap().contains(&unit.name) {
            return Err(HelmfireError::Collaborator {
                unit: unit.name.clone(),
                message: "upgrade failed".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub reports: Mutex<Vec<DriftReport>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<DriftReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(&self, report: &DriftReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// Only the listed PIDs are alive.
#[derive(Default)]
pub struct FakeProcessTable {
    pub alive: Mutex<HashSet<u32>>,
}

impl FakeProcessTable {
    pub fn add(&self, pid: u32) {
        self.alive.lock().unwrap().insert(pid);
    }
}

struct FakeProcess {
    pid: u32,
    alive: bool,
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn terminate(&self) -> Result<()> {
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        Ok(())
    }
}

impl ProcessTable for FakeProcessTable {
    fn open(&self, pid: u32) -> Box<dyn ProcessHandle> {
        Box::new(FakeProcess {
            pid,
            alive: self.alive.lock().unwrap().contains(&pid),
        })
    }
}

pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
