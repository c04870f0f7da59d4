//! HTTP client for the helmfired control API.

use crate::error::{HelmfireError, Result};
use crate::types::{
    AddChartRequest, AddImageRequest, DaemonStatus, DriftSummary, ErrorResponse, HealthResponse,
    RemoveRequest, Substitutions, SuccessResponse, SyncRequest, SyncResponse,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// A sync runs helm for every selected release before answering.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Client for a running helmfired
#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    http: Client,
    sync_timeout: Duration,
}

impl DaemonClient {
    /// `addr` is `host:port` or a full `http://` URL.
    pub fn new(addr: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HelmfireError::Transport(e.to_string()))?;
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr)
        };
        Ok(Self {
            base_url,
            http,
            sync_timeout: SYNC_TIMEOUT,
        })
    }

    /// Replace the deadline for `sync`, which outlives the usual request timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: Option<&B>) -> Result<T> {
        self.post_within(path, body, REQUEST_TIMEOUT).await
    }

    async fn post_within<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<T> {
        debug!(path, timeout_secs = timeout.as_secs(), "POST");
        let mut request = self.http.post(self.url(path)).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    pub async fn is_healthy(&self) -> bool {
        self.health().await.map(|h| h.status == "ok").unwrap_or(false)
    }

    pub async fn status(&self) -> Result<DaemonStatus> {
        self.get("/api/v1/status").await
    }

    pub async fn add_chart(&self, original: &str, local_path: &str) -> Result<SuccessResponse> {
        let body = AddChartRequest {
            original: original.to_string(),
            local_path: local_path.to_string(),
        };
        self.post("/api/v1/charts", Some(&body)).await
    }

    pub async fn remove_chart(&self, original: &str) -> Result<SuccessResponse> {
        let body = RemoveRequest {
            original: original.to_string(),
        };
        self.post("/api/v1/charts/remove", Some(&body)).await
    }

    pub async fn add_image(&self, original: &str, replacement: &str) -> Result<SuccessResponse> {
        let body = AddImageRequest {
            original: original.to_string(),
            replacement: replacement.to_string(),
        };
        self.post("/api/v1/images", Some(&body)).await
    }

    pub async fn remove_image(&self, original: &str) -> Result<SuccessResponse> {
        let body = RemoveRequest {
            original: original.to_string(),
        };
        self.post("/api/v1/images/remove", Some(&body)).await
    }

    pub async fn substitutions(&self) -> Result<Substitutions> {
        self.get("/api/v1/substitutions").await
    }

    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        self.post_within("/api/v1/sync", Some(request), self.sync_timeout)
            .await
    }

    pub async fn drift(&self) -> Result<DriftSummary> {
        self.get("/api/v1/drift").await
    }

    pub async fn reload(&self) -> Result<SuccessResponse> {
        self.post::<(), _>("/api/v1/reload", None).await
    }

    pub async fn shutdown(&self) -> Result<SuccessResponse> {
        self.post::<(), _>("/api/v1/shutdown", None).await
    }
}

fn transport(e: reqwest::Error) -> HelmfireError {
    if e.is_timeout() {
        HelmfireError::Transport(format!("request timed out: {}", e))
    } else {
        HelmfireError::Transport(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
        return Err(HelmfireError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| {
        HelmfireError::Transport(format!("invalid response from daemon: {}", e))
    })
}

/// Status of the daemon recorded in `lock_path`.
///
/// `is_running` decides liveness from the lock file; the API is only
/// contacted when it says a daemon is alive.
pub async fn daemon_status<F>(lock_path: &Path, addr: &str, is_running: F) -> Result<DaemonStatus>
where
    F: FnOnce(&Path) -> Result<bool>,
{
    if !is_running(lock_path)? {
        return Ok(DaemonStatus::not_running());
    }
    DaemonClient::new(addr)?.status().await
}
