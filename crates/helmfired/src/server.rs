//! HTTP control API server for helmfired

use crate::drift::DriftScheduler;
use crate::routes;
use crate::shutdown::{self, ShutdownTrigger};
use chrono::{DateTime, Utc};
use helmfire_common::helm::UnitDeployer;
use helmfire_common::{Result, SubstitutionRegistry, UnitStore};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Largest request body the API accepts
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<SubstitutionRegistry>,
    pub units: Arc<UnitStore>,
    pub deployer: Arc<dyn UnitDeployer>,
    pub scheduler: Option<Arc<DriftScheduler>>,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    started: Instant,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    /// Signalled by `POST /api/v1/shutdown`
    pub shutdown_requested: Arc<Notify>,
}

impl AppState {
    pub fn new(
        registry: Arc<SubstitutionRegistry>,
        units: Arc<UnitStore>,
        deployer: Arc<dyn UnitDeployer>,
        scheduler: Option<Arc<DriftScheduler>>,
    ) -> Self {
        Self {
            registry,
            units,
            deployer,
            scheduler,
            pid: std::process::id(),
            start_time: Utc::now(),
            started: Instant::now(),
            last_sync: Mutex::new(None),
            shutdown_requested: Arc::new(Notify::new()),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_sync(&self) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }
}

/// A running API server.
pub struct ServerHandle {
    addr: SocketAddr,
    trigger: ShutdownTrigger,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, let in-flight requests finish within `grace`, then abort.
    pub async fn shutdown(self, grace: Duration) {
        self.trigger.trigger();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(Ok(()))) => info!("control API stopped"),
            Ok(Ok(Err(e))) => error!(error = %e, "control API exited with error"),
            Ok(Err(e)) => error!(error = %e, "control API task failed"),
            Err(_) => {
                warn!(grace = ?grace, "control API did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

/// Bind the control API. Fails without side effects if the address is taken.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve the control API on an already bound listener.
pub fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<ServerHandle> {
    let addr = listener.local_addr()?;
    let app = routes::router()
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http());

    let (trigger, token) = shutdown::channel();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    info!("Listening on http://{}", addr);
    Ok(ServerHandle {
        addr,
        trigger,
        task,
    })
}
