//! Control API exercised end to end through `DaemonClient`.

mod common;

use common::Fixture;
use helmfire_common::client::{daemon_status, DaemonClient};
use helmfire_common::helm::DeployMode;
use helmfire_common::types::SyncRequest;
use helmfire_common::HelmfireError;
use helmfired::lockfile::is_running_with;
use helmfired::Daemon;

async fn started(fixture: &Fixture) -> (Daemon, DaemonClient) {
    let daemon = fixture.daemon();
    let addr = daemon.start().await.unwrap();
    let client = DaemonClient::new(&addr.to_string()).unwrap();
    (daemon, client)
}

#[tokio::test]
async fn test_image_substitutions() {
    let fixture = Fixture::new();
    let (daemon, client) = started(&fixture).await;

    client
        .add_image("postgres:15", "localhost:5000/postgres:custom")
        .await
        .unwrap();

    let subs = client.substitutions().await.unwrap();
    assert!(subs.charts.is_empty());
    assert_eq!(subs.images.len(), 1);
    assert_eq!(subs.images[0].original, "postgres:15");
    assert_eq!(subs.images[0].replacement, "localhost:5000/postgres:custom");

    let status = client.status().await.unwrap();
    assert!(status.running);
    assert_eq!(status.pid, Some(std::process::id()));
    assert_eq!(status.active_substitutions.images, 1);
    assert!(status.uptime.is_some());

    client.remove_image("postgres:15").await.unwrap();
    let err = client.remove_image("postgres:15").await.unwrap_err();
    assert!(matches!(err, HelmfireError::Api { status: 404, .. }));

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_chart_substitution_is_shared_with_registry() {
    let fixture = Fixture::new();
    let (daemon, client) = started(&fixture).await;

    let chart_dir = fixture.dir.path().join("charts").join("nginx");
    std::fs::create_dir_all(&chart_dir).unwrap();
    std::fs::write(chart_dir.join("Chart.yaml"), "name: nginx\n").unwrap();

    client
        .add_chart("bitnami/nginx", &chart_dir.to_string_lossy())
        .await
        .unwrap();
    assert_eq!(
        daemon.registry().resolve_chart("bitnami/nginx"),
        Some(chart_dir.clone())
    );

    let err = client
        .add_chart("bitnami/redis", "/does/not/exist")
        .await
        .unwrap_err();
    match err {
        HelmfireError::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("does not exist"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(daemon.registry().resolve_chart("bitnami/redis").is_none());

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_sync_and_last_sync() {
    let fixture = Fixture::new();
    fixture
        .deployer
        .failing
        .lock()
        .unwrap()
        .insert("redis".to_string());
    let (daemon, client) = started(&fixture).await;

    assert!(client.status().await.unwrap().last_sync.is_none());

    let response = client.sync(&SyncRequest::default()).await.unwrap();
    assert_eq!(response.synced, vec!["nginx".to_string()]);
    assert_eq!(response.failed.len(), 1);
    assert_eq!(response.failed[0].name, "redis");
    assert!(client.status().await.unwrap().last_sync.is_some());

    let response = client
        .sync(&SyncRequest {
            releases: vec!["nginx".to_string()],
            dry_run: true,
        })
        .await
        .unwrap();
    assert_eq!(response.synced, vec!["nginx".to_string()]);
    assert_eq!(
        fixture.deployer.calls().last().unwrap(),
        &("nginx".to_string(), DeployMode::DryRun)
    );

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_picks_up_helmfile_changes() {
    let fixture = Fixture::new();
    let (daemon, client) = started(&fixture).await;

    std::fs::write(
        &fixture.config.helmfile.path,
        "releases:\n  - name: postgres\n    chart: bitnami/postgresql\n",
    )
    .unwrap();
    let response = client.reload().await.unwrap();
    assert!(response.message.contains("1 releases"));

    let response = client
        .sync(&SyncRequest {
            releases: vec!["postgres".to_string(), "nginx".to_string()],
            dry_run: false,
        })
        .await
        .unwrap();
    assert_eq!(response.synced, vec!["postgres".to_string()]);
    assert_eq!(response.failed[0].name, "nginx");

    std::fs::write(&fixture.config.helmfile.path, "releases: [broken").unwrap();
    let err = client.reload().await.unwrap_err();
    assert!(matches!(err, HelmfireError::Api { status: 500, .. }));

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_drift_summary_when_disabled() {
    let fixture = Fixture::new();
    let (daemon, client) = started(&fixture).await;

    let summary = client.drift().await.unwrap();
    assert!(!summary.enabled);
    assert_eq!(summary.ticks, 0);

    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn test_daemon_status_uses_lock_file() {
    let fixture = Fixture::new();
    let pid_file = fixture.pid_file();
    let processes = fixture.processes.clone();

    let status = daemon_status(&pid_file, "127.0.0.1:9", |p| {
        is_running_with(p, processes.as_ref())
    })
    .await
    .unwrap();
    assert!(!status.running);

    let (daemon, client) = started(&fixture).await;
    processes.add(std::process::id());
    let status = daemon_status(&pid_file, client.base_url(), |p| {
        is_running_with(p, processes.as_ref())
    })
    .await
    .unwrap();
    assert!(status.running);
    assert_eq!(status.pid, Some(std::process::id()));

    daemon.stop().await.unwrap();
}
