//! Daemon supervisor
//!
//! NotStarted -> Starting -> Running -> Stopping -> Stopped, or
//! Starting -> Failed when the helmfile, the lock or the API bind fails.
//! A failed start leaves no lock file behind.

use crate::drift::{build_notifiers, heal_with, DriftScheduler, Notifier};
use crate::lockfile::LockFile;
use crate::process::{OsProcessTable, ProcessTable};
use crate::server::{self, AppState, ServerHandle};
use crate::shutdown::{self, ShutdownTrigger};
use helmfire_common::config::HelmfireConfig;
use helmfire_common::helm::{HelmCli, UnitDeployer, UnitDiffer};
use helmfire_common::{HelmfireError, Result, SubstitutionRegistry, UnitStore};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info, warn};

const COMPONENT: &str = "helmfire daemon";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "not started",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Signals {
    term: Signal,
    int: Signal,
}

/// Everything owned while the daemon runs
struct Running {
    lock: LockFile,
    server: ServerHandle,
    scheduler: Option<Arc<DriftScheduler>>,
    state: Arc<AppState>,
    shutdown: ShutdownTrigger,
    signals: Option<Signals>,
}

pub struct Daemon {
    config: HelmfireConfig,
    registry: Arc<SubstitutionRegistry>,
    processes: Arc<dyn ProcessTable>,
    differ: Option<Arc<dyn UnitDiffer>>,
    deployer: Option<Arc<dyn UnitDeployer>>,
    extra_notifiers: Vec<Arc<dyn Notifier>>,
    handle_signals: bool,
    phase: Mutex<Phase>,
    running: Mutex<Option<Running>>,
}

impl Daemon {
    pub fn new(config: HelmfireConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SubstitutionRegistry::new()),
            processes: Arc::new(OsProcessTable),
            differ: None,
            deployer: None,
            extra_notifiers: Vec::new(),
            handle_signals: true,
            phase: Mutex::new(Phase::NotStarted),
            running: Mutex::new(None),
        }
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.processes = table;
        self
    }

    /// Replace the helm CLI with other diff/deploy collaborators.
    pub fn with_collaborators(
        mut self,
        differ: Arc<dyn UnitDiffer>,
        deployer: Arc<dyn UnitDeployer>,
    ) -> Self {
        self.differ = Some(differ);
        self.deployer = Some(deployer);
        self
    }

    /// Notifier added after the configured ones.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.extra_notifiers.push(notifier);
        self
    }

    /// Whether `wait` listens for SIGTERM/SIGINT.
    pub fn with_signal_handlers(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn config(&self) -> &HelmfireConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SubstitutionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Address the control API is bound to, once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.server.local_addr())
    }

    /// Take the lock, start the control API and, if configured, drift detection.
    pub async fn start(&self) -> Result<SocketAddr> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            match *phase {
                Phase::NotStarted => *phase = Phase::Starting,
                Phase::Stopped | Phase::Failed => {
                    return Err(HelmfireError::Terminated(COMPONENT.to_string()))
                }
                _ => return Err(HelmfireError::AlreadyRunning(COMPONENT.to_string())),
            }
        }

        match self.start_components().await {
            Ok(running) => {
                let addr = running.server.local_addr();
                *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(running);
                self.set_phase(Phase::Running);
                info!(pid = std::process::id(), addr = %addr, "helmfire daemon started");
                Ok(addr)
            }
            Err(e) => {
                error!(error = %e, "failed to start daemon");
                self.set_phase(Phase::Failed);
                Err(e)
            }
        }
    }

    async fn start_components(&self) -> Result<Running> {
        let helmfile = &self.config.helmfile;
        let units = Arc::new(UnitStore::load(&helmfile.path, &helmfile.environment)?);

        let lock = LockFile::new(&self.config.daemon.pid_file);
        lock.acquire(std::process::id(), self.processes.as_ref())?;

        match self.start_with_lock(units, lock.clone()).await {
            Ok(running) => Ok(running),
            Err(e) => {
                if let Err(remove_err) = lock.remove() {
                    warn!(error = %remove_err, "failed to remove lock file");
                }
                Err(e)
            }
        }
    }

    async fn start_with_lock(&self, units: Arc<UnitStore>, lock: LockFile) -> Result<Running> {
        self.config.daemon.socket_addr()?;
        let listener = server::bind(&self.config.daemon.api_addr).await?;

        let signals = if self.handle_signals {
            Some(Signals {
                term: signal(SignalKind::terminate())?,
                int: signal(SignalKind::interrupt())?,
            })
        } else {
            None
        };

        let helm = Arc::new(HelmCli::new(
            self.config.helm.settings(),
            Arc::clone(&self.registry),
        ));
        let differ: Arc<dyn UnitDiffer> = match &self.differ {
            Some(differ) => Arc::clone(differ),
            None => helm.clone(),
        };
        let deployer: Arc<dyn UnitDeployer> = match &self.deployer {
            Some(deployer) => Arc::clone(deployer),
            None => helm,
        };

        let (shutdown, token) = shutdown::channel();
        let scheduler = if self.config.drift.enabled() {
            let scheduler = Arc::new(self.build_scheduler(&units, differ, &deployer));
            scheduler.start(token)?;
            Some(scheduler)
        } else {
            None
        };

        let state = Arc::new(AppState::new(
            Arc::clone(&self.registry),
            units,
            deployer,
            scheduler.clone(),
        ));
        let server = match server::serve(listener, Arc::clone(&state)) {
            Ok(server) => server,
            Err(e) => {
                if let Some(scheduler) = &scheduler {
                    let _ = scheduler.stop().await;
                }
                return Err(e);
            }
        };

        Ok(Running {
            lock,
            server,
            scheduler,
            state,
            shutdown,
            signals,
        })
    }

    fn build_scheduler(
        &self,
        units: &Arc<UnitStore>,
        differ: Arc<dyn UnitDiffer>,
        deployer: &Arc<dyn UnitDeployer>,
    ) -> DriftScheduler {
        let drift = &self.config.drift;
        let scheduler = DriftScheduler::new(units.clone(), differ, drift.interval())
            .with_default_namespace(&self.config.helm.namespace);

        for notifier in build_notifiers(drift) {
            scheduler.add_notifier(notifier);
        }
        for notifier in &self.extra_notifiers {
            scheduler.add_notifier(Arc::clone(notifier));
        }

        if drift.auto_heal {
            scheduler.enable_auto_heal(true, heal_with(Arc::clone(units), Arc::clone(deployer)));
        }
        scheduler
    }

    /// Block until SIGTERM/SIGINT, an API shutdown request or a direct
    /// [`Daemon::stop`], then stop.
    pub async fn wait(&self) -> Result<()> {
        let (notify, signals) = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(running) = running.as_mut() else {
                return match self.phase() {
                    Phase::Stopping | Phase::Stopped => Ok(()),
                    _ => Err(HelmfireError::NotRunning(COMPONENT.to_string())),
                };
            };
            (
                Arc::clone(&running.state.shutdown_requested),
                running.signals.take(),
            )
        };

        wait_for_shutdown(notify, signals).await;
        self.stop().await
    }

    /// Stop drift detection, then the control API, then release the lock.
    ///
    /// Calling it again after a completed stop is a no-op.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            match *phase {
                Phase::Running => *phase = Phase::Stopping,
                Phase::Stopping | Phase::Stopped => return Ok(()),
                _ => return Err(HelmfireError::NotRunning(COMPONENT.to_string())),
            }
        }

        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            self.set_phase(Phase::Stopped);
            return Ok(());
        };

        info!("stopping helmfire daemon");
        // Release a task blocked in wait().
        running.state.shutdown_requested.notify_one();
        if let Some(scheduler) = &running.scheduler {
            if let Err(e) = scheduler.stop().await {
                warn!(error = %e, "drift scheduler was not running");
            }
        }
        running.shutdown.trigger();
        running
            .server
            .shutdown(self.config.daemon.shutdown_grace())
            .await;

        let result = running.lock.remove();
        self.set_phase(Phase::Stopped);
        let counts = self.registry().counts();
        info!(
            charts = counts.charts,
            images = counts.images,
            "helmfire daemon stopped"
        );
        result
    }
}

async fn wait_for_shutdown(notify: Arc<Notify>, signals: Option<Signals>) {
    match signals {
        Some(mut signals) => {
            tokio::select! {
                _ = signals.term.recv() => info!("received SIGTERM"),
                _ = signals.int.recv() => info!("received SIGINT"),
                _ = notify.notified() => info!("shutdown requested"),
            }
        }
        None => {
            notify.notified().await;
            info!("shutdown requested");
        }
    }
}

/// Start a daemon for `config` and run it until shutdown.
pub async fn run(config: HelmfireConfig) -> Result<()> {
    let daemon = Daemon::new(config);
    daemon.start().await?;
    daemon.wait().await
}
