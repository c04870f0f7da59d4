//! Control API routes for helmfired

use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use helmfire_common::durations::format_uptime;
use helmfire_common::helm::DeployMode;
use helmfire_common::types::{
    AddChartRequest, AddImageRequest, DaemonStatus, DriftSummary, ErrorResponse, HealthResponse,
    RemoveRequest, Substitutions, SuccessResponse, SyncFailure, SyncRequest, SyncResponse,
};
use helmfire_common::{HelmfireError, ManagedUnit};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type AppStateArc = Arc<AppState>;
type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Delay between acknowledging a shutdown and acting on it
const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

pub fn router() -> Router<AppStateArc> {
    Router::new()
        .merge(health_routes())
        .merge(substitution_routes())
        .merge(operation_routes())
}

fn api_error(e: HelmfireError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if e.is_caller_error() {
        debug!(error = %e, "rejected request");
    } else {
        error!(error = %e, "request failed");
    }
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("invalid request body: {}", rejection.body_text()),
        }),
    )
}

fn success(message: String) -> ApiResult<SuccessResponse> {
    Ok(Json(SuccessResponse { message }))
}

// ============================================================================
// Health and Status Routes
// ============================================================================

fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/drift", get(drift))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(state): State<AppStateArc>) -> Json<DaemonStatus> {
    let uptime = state.uptime().as_secs();
    Json(DaemonStatus {
        running: true,
        pid: Some(state.pid),
        start_time: Some(state.start_time),
        uptime: Some(format_uptime(uptime)),
        uptime_seconds: uptime,
        active_substitutions: state.registry.counts(),
        last_sync: state.last_sync(),
    })
}

async fn drift(State(state): State<AppStateArc>) -> Json<DriftSummary> {
    let summary = state
        .scheduler
        .as_ref()
        .map(|s| s.summary())
        .unwrap_or_default();
    Json(summary)
}

// ============================================================================
// Substitution Routes
// ============================================================================

fn substitution_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/charts", post(add_chart))
        .route("/api/v1/charts/remove", post(remove_chart))
        .route("/api/v1/images", post(add_image))
        .route("/api/v1/images/remove", post(remove_image))
        .route("/api/v1/substitutions", get(list_substitutions))
}

async fn add_chart(
    State(state): State<AppStateArc>,
    payload: Result<Json<AddChartRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    let path = state
        .registry
        .add_chart(&req.original, &req.local_path)
        .map_err(api_error)?;
    info!(original = %req.original, path = %path.display(), "chart substitution added");
    success(format!(
        "Chart substitution added: {} -> {}",
        req.original,
        path.display()
    ))
}

async fn remove_chart(
    State(state): State<AppStateArc>,
    payload: Result<Json<RemoveRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    state.registry.remove_chart(&req.original).map_err(api_error)?;
    info!(original = %req.original, "chart substitution removed");
    success(format!("Chart substitution removed: {}", req.original))
}

async fn add_image(
    State(state): State<AppStateArc>,
    payload: Result<Json<AddImageRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    state
        .registry
        .add_image(&req.original, &req.replacement)
        .map_err(api_error)?;
    info!(original = %req.original, replacement = %req.replacement, "image substitution added");
    success(format!(
        "Image substitution added: {} -> {}",
        req.original, req.replacement
    ))
}

async fn remove_image(
    State(state): State<AppStateArc>,
    payload: Result<Json<RemoveRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    state.registry.remove_image(&req.original).map_err(api_error)?;
    info!(original = %req.original, "image substitution removed");
    success(format!("Image substitution removed: {}", req.original))
}

async fn list_substitutions(State(state): State<AppStateArc>) -> Json<Substitutions> {
    Json(state.registry.snapshot())
}

// ============================================================================
// Operation Routes
// ============================================================================

fn operation_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/sync", post(sync))
        .route("/api/v1/reload", post(reload))
        .route("/api/v1/shutdown", post(shutdown))
}

async fn sync(
    State(state): State<AppStateArc>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> ApiResult<SyncResponse> {
    let Json(req) = payload.map_err(bad_body)?;
    let mode = if req.dry_run {
        DeployMode::DryRun
    } else {
        DeployMode::Apply
    };

    let mut response = SyncResponse::default();
    let mut targets: Vec<ManagedUnit> = Vec::new();
    if req.releases.is_empty() {
        targets = state
            .units
            .releases()
            .into_iter()
            .filter(|u| u.is_installed())
            .collect();
    } else {
        for name in &req.releases {
            match state.units.find(name) {
                Some(unit) => targets.push(unit),
                None => response.failed.push(SyncFailure {
                    name: name.clone(),
                    error: "release not found in helmfile".to_string(),
                }),
            }
        }
    }

    info!(releases = targets.len(), dry_run = req.dry_run, "sync requested");
    let deployer = Arc::clone(&state.deployer);
    let outcome = tokio::task::spawn_blocking(move || {
        targets
            .into_iter()
            .map(|unit| {
                let result = deployer.deploy(&unit, mode);
                (unit.name, result)
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| {
        api_error(HelmfireError::Collaborator {
            unit: "sync".to_string(),
            message: e.to_string(),
        })
    })?;

    for (name, result) in outcome {
        match result {
            Ok(()) => response.synced.push(name),
            Err(e) => {
                error!(release = %name, error = %e, "sync failed");
                response.failed.push(SyncFailure {
                    name,
                    error: e.to_string(),
                });
            }
        }
    }

    if !req.dry_run && !response.synced.is_empty() {
        state.record_sync();
    }
    Ok(Json(response))
}

async fn reload(State(state): State<AppStateArc>) -> ApiResult<SuccessResponse> {
    let units = Arc::clone(&state.units);
    let count = tokio::task::spawn_blocking(move || units.reload())
        .await
        .map_err(|e| api_error(HelmfireError::Helmfile(e.to_string())))?
        .map_err(api_error)?;
    success(format!("Helmfile reloaded: {} releases", count))
}

async fn shutdown(State(state): State<AppStateArc>) -> Json<SuccessResponse> {
    info!("shutdown requested via API");
    let notify = Arc::clone(&state.shutdown_requested);
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        notify.notify_one();
    });
    Json(SuccessResponse {
        message: "Shutting down".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use helmfire_common::helm::UnitDeployer;
    use helmfire_common::helmfile::HelmfileSpec;
    use helmfire_common::{Result, SubstitutionRegistry, UnitStore};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingDeployer {
        calls: Mutex<Vec<(String, DeployMode)>>,
    }

    impl UnitDeployer for RecordingDeployer {
        fn deploy(&self, unit: &ManagedUnit, mode: DeployMode) -> Result<()> {
            self.calls.lock().unwrap().push((unit.name.clone(), mode));
            if unit.name == "broken" {
                return Err(HelmfireError::Collaborator {
                    unit: unit.name.clone(),
                    message: "upgrade failed".to_string(),
                });
            }
            Ok(())
        }
    }

    fn test_state() -> (Arc<AppState>, Arc<RecordingDeployer>) {
        let spec = HelmfileSpec::parse(
            r#"
releases:
  - name: nginx
    chart: bitnami/nginx
  - name: broken
    chart: bitnami/broken
  - name: disabled
    chart: bitnami/disabled
    installed: false
"#,
        )
        .unwrap();
        let deployer = Arc::new(RecordingDeployer::default());
        let state = AppState::new(
            Arc::new(SubstitutionRegistry::new()),
            Arc::new(UnitStore::from_spec(spec)),
            deployer.clone(),
            None,
        );
        (Arc::new(state), deployer)
    }

    async fn call(state: &Arc<AppState>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router()
            .with_state(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (state, _) = test_state();
        let (status, body) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&state, Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);
        assert_eq!(body["pid"], std::process::id());
        assert_eq!(body["activeSubstitutions"]["images"], 0);
        assert!(body.get("lastSync").is_none());
    }

    #[tokio::test]
    async fn test_chart_substitution_flow() {
        let (state, _) = test_state();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Chart.yaml"), "name: nginx\n").unwrap();

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/v1/charts",
            Some(json!({"original": "bitnami/nginx", "localPath": dir.path()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("bitnami/nginx"));

        let (_, body) = call(&state, Method::GET, "/api/v1/substitutions", None).await;
        assert_eq!(body["charts"][0]["original"], "bitnami/nginx");

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/v1/charts/remove",
            Some(json!({"original": "bitnami/nginx"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.registry.list_charts().is_empty());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (state, _) = test_state();
        let (status, body) = call(
            &state,
            Method::POST,
            "/api/v1/charts",
            Some(json!({"original": "bitnami/nginx", "localPath": "/definitely/not/here"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("does not exist"));

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/v1/images",
            Some(json!({"original": "", "replacement": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/v1/images/remove",
            Some(json!({"original": "postgres:15"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "image substitution not found: postgres:15");

        let (status, body) = call(&state, Method::POST, "/api/v1/images", Some(json!({"nope": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (state, _) = test_state();
        let (status, _) = call(&state, Method::GET, "/api/v1/charts", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = call(&state, Method::POST, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_sync_reports_failures() {
        let (state, deployer) = test_state();
        let (status, body) = call(&state, Method::POST, "/api/v1/sync", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["synced"], json!(["nginx"]));
        assert_eq!(body["failed"][0]["name"], "broken");
        assert_eq!(deployer.calls.lock().unwrap().len(), 2);
        assert!(state.last_sync().is_some());

        let (_, body) = call(
            &state,
            Method::POST,
            "/api/v1/sync",
            Some(json!({"releases": ["nginx", "ghost"], "dryRun": true})),
        )
        .await;
        assert_eq!(body["synced"], json!(["nginx"]));
        assert_eq!(body["failed"][0]["name"], "ghost");
        assert_eq!(
            deployer.calls.lock().unwrap().last().unwrap(),
            &("nginx".to_string(), DeployMode::DryRun)
        );
    }

    #[tokio::test]
    async fn test_drift_disabled_and_reload_without_file() {
        let (state, _) = test_state();
        let (status, body) = call(&state, Method::GET, "/api/v1/drift", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);

        let (status, body) = call(&state, Method::POST, "/api/v1/reload", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("no helmfile path"));
    }

    #[tokio::test]
    async fn test_shutdown_notifies() {
        let (state, _) = test_state();
        let (status, body) = call(&state, Method::POST, "/api/v1/shutdown", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Shutting down");

        tokio::time::timeout(Duration::from_secs(2), state.shutdown_requested.notified())
            .await
            .unwrap();
    }
}
