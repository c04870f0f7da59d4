//! Drift scheduler
//!
//! Idle -> Running -> Stopped. A stopped scheduler is terminal; build a new
//! one to run again. Each tick diffs every installed unit in order, reports
//! non-empty diffs to all notifiers and optionally heals the unit.

use super::notifiers::Notifier;
use super::report::DriftReport;
use crate::shutdown::{self, ShutdownToken, ShutdownTrigger};
use chrono::{DateTime, Utc};
use helmfire_common::helm::{DeployMode, UnitDeployer, UnitDiffer};
use helmfire_common::types::DriftSummary;
use helmfire_common::{HelmfireError, Result, UnitSource, UnitStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

const COMPONENT: &str = "drift scheduler";

/// Re-applies the desired state of the named unit.
pub type HealFn = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Heal by redeploying the unit's current definition from `units`.
pub fn heal_with(units: Arc<UnitStore>, deployer: Arc<dyn UnitDeployer>) -> HealFn {
    Arc::new(move |name: &str| {
        let unit = units.find(name).ok_or_else(|| {
            HelmfireError::collaborator(name, "release no longer in helmfile")
        })?;
        deployer.deploy(&unit, DeployMode::Apply)
    })
}

#[derive(Default)]
struct AutoHeal {
    enabled: bool,
    heal: Option<HealFn>,
}

#[derive(Default)]
struct Stats {
    ticks: AtomicU64,
    drift_detected: AtomicU64,
    healed: AtomicU64,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

struct SchedulerInner {
    units: Arc<dyn UnitSource>,
    differ: Arc<dyn UnitDiffer>,
    interval: Duration,
    default_namespace: String,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    auto_heal: RwLock<AutoHeal>,
    stats: Stats,
}

enum Lifecycle {
    Idle,
    Running {
        stop: ShutdownTrigger,
        handle: JoinHandle<()>,
    },
    Stopped,
}

pub struct DriftScheduler {
    inner: Arc<SchedulerInner>,
    state: Mutex<Lifecycle>,
}

impl DriftScheduler {
    pub fn new(units: Arc<dyn UnitSource>, differ: Arc<dyn UnitDiffer>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                units,
                differ,
                interval,
                default_namespace: String::new(),
                notifiers: RwLock::new(Vec::new()),
                auto_heal: RwLock::new(AutoHeal::default()),
                stats: Stats::default(),
            }),
            state: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Namespace reported for units that do not set one.
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.default_namespace = namespace.to_string();
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.inner
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifier);
    }

    pub fn enable_auto_heal(&self, enabled: bool, heal: HealFn) {
        let mut auto_heal = self
            .inner
            .auto_heal
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        auto_heal.enabled = enabled;
        auto_heal.heal = Some(heal);
    }

    /// Spawn the tick loop on the current tokio runtime.
    ///
    /// The first check runs immediately. The loop ends when `parent` fires or
    /// `stop` is called.
    pub fn start(&self, parent: ShutdownToken) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            Lifecycle::Running { .. } => return Err(HelmfireError::AlreadyRunning(COMPONENT.to_string())),
            Lifecycle::Stopped => return Err(HelmfireError::Terminated(COMPONENT.to_string())),
            Lifecycle::Idle => {}
        }
        if self.inner.interval.is_zero() {
            return Err(HelmfireError::InvalidConfig(
                "drift interval must be greater than zero".to_string(),
            ));
        }

        let (stop, stop_token) = shutdown::channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner, parent, stop_token));

        info!(interval = ?self.inner.interval, "drift detection started");
        *state = Lifecycle::Running { stop, handle };
        Ok(())
    }

    /// Cancel the loop and wait for an in-flight check to finish.
    pub async fn stop(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                Lifecycle::Running { .. } => std::mem::replace(&mut *state, Lifecycle::Stopped),
                _ => return Err(HelmfireError::NotRunning(COMPONENT.to_string())),
            }
        };

        if let Lifecycle::Running { stop, handle } = previous {
            stop.trigger();
            if let Err(e) = handle.await {
                error!(error = %e, "drift loop ended abnormally");
            }
        }
        info!("drift detection stopped");
        Ok(())
    }

    /// True while the tick loop is alive.
    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*state, Lifecycle::Running { handle, .. } if !handle.is_finished())
    }

    /// Run one check synchronously. Returns the number of drifted units.
    pub fn check_drift(&self) -> usize {
        self.inner.check_drift()
    }

    pub fn summary(&self) -> DriftSummary {
        let stats = &self.inner.stats;
        let auto_heal = self
            .inner
            .auto_heal
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled;
        DriftSummary {
            enabled: true,
            running: self.is_running(),
            auto_heal,
            interval_secs: self.inner.interval.as_secs(),
            ticks: stats.ticks.load(Ordering::Relaxed),
            drift_detected: stats.drift_detected.load(Ordering::Relaxed),
            healed: stats.healed.load(Ordering::Relaxed),
            last_check: *stats
                .last_check
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

async fn run_loop(inner: Arc<SchedulerInner>, parent: ShutdownToken, stop: ShutdownToken) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = parent.cancelled() => break,
            _ = ticker.tick() => {
                let tick = Arc::clone(&inner);
                // Checks shell out and block; cancellation waits for them.
                if let Err(e) = tokio::task::spawn_blocking(move || tick.check_drift()).await {
                    error!(error = %e, "drift check panicked");
                }
            }
        }
    }
    debug!("drift loop exited");
}

impl SchedulerInner {
    fn check_drift(&self) -> usize {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let units = self.units.units();
        debug!(units = units.len(), "checking for drift");

        let mut drifted = 0;
        for unit in units.iter().filter(|u| u.is_installed()) {
            let diff = match self.differ.diff(unit) {
                Ok(diff) => diff,
                Err(e) => {
                    error!(release = %unit.name, error = %e, "failed to check drift");
                    continue;
                }
            };
            if diff.is_empty() {
                continue;
            }

            drifted += 1;
            self.stats.drift_detected.fetch_add(1, Ordering::Relaxed);
            let mut report =
                DriftReport::detected(unit, unit.effective_namespace(&self.default_namespace), diff);
            self.dispatch(&report);

            if let Some(heal) = self.heal_fn() {
                info!(release = %unit.name, "auto-healing drift");
                match heal(&unit.name) {
                    Ok(()) => {
                        report.mark_healed();
                        self.stats.healed.fetch_add(1, Ordering::Relaxed);
                        info!(release = %unit.name, "drift healed");
                        self.dispatch(&report);
                    }
                    Err(e) => {
                        error!(release = %unit.name, error = %e, "failed to heal drift");
                    }
                }
            }
        }

        *self
            .stats
            .last_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        drifted
    }

    fn heal_fn(&self) -> Option<HealFn> {
        let auto_heal = self.auto_heal.read().unwrap_or_else(PoisonError::into_inner);
        if auto_heal.enabled {
            auto_heal.heal.clone()
        } else {
            None
        }
    }

    fn dispatch(&self, report: &DriftReport) {
        let notifiers = self
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for notifier in notifiers {
            if let Err(e) = notifier.notify(report) {
                error!(
                    notifier = notifier.name(),
                    release = %report.unit_name,
                    error = %e,
                    "failed to send notification"
                );
            }
        }
    }
}
