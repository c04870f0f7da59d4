//! sync - deploy helmfile releases with inline substitutions, then
//! optionally watch the helmfile or keep checking for drift.

use super::Context;
use crate::cli::SyncArgs;
use crate::output;
use anyhow::{bail, Context as _, Result};
use helmfire_common::config::DriftConfig;
use helmfire_common::durations::{interval_secs, parse_duration};
use helmfire_common::helm::{DeployMode, HelmCli, RepositorySyncer, UnitDeployer};
use helmfire_common::helmfile::parse_selector;
use helmfire_common::{ManagedUnit, UnitStore};
use helmfired::drift::{build_notifiers, heal_with, DriftScheduler};
use helmfired::shutdown;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Editors often write a file in several steps; wait this long for the burst to settle.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Split `ORIGINAL=VALUE` from `--chart`/`--image`.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((original, value)) if !original.trim().is_empty() && !value.trim().is_empty() => {
            Ok((original.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("invalid substitution '{}': expected ORIGINAL=VALUE", raw),
    }
}

/// Deploy every installed unit; a failure is recorded and the rest continue.
pub fn sync_units<D>(units: &[ManagedUnit], deployer: &D, mode: DeployMode) -> SyncReport
where
    D: UnitDeployer + ?Sized,
{
    let mut report = SyncReport::default();
    for unit in units {
        if !unit.is_installed() {
            info!(release = %unit.name, "skipping release with installed: false");
            report.skipped.push(unit.name.clone());
            continue;
        }

        info!(release = %unit.name, chart = %unit.chart, ?mode, "syncing release");
        match deployer.deploy(unit, mode) {
            Ok(()) => {
                output::success(&format!("Synced {}", unit.name));
                report.synced.push(unit.name.clone());
            }
            Err(e) => {
                error!(release = %unit.name, error = %e, "release sync failed");
                output::failure(&format!("Failed to sync {}: {}", unit.name, e));
                report.failed.push((unit.name.clone(), e.to_string()));
            }
        }
    }
    report
}

/// Whether a watcher event touches the helmfile itself.
pub fn is_helmfile_event(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}

pub async fn run(ctx: &Context, args: SyncArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(file) = &args.file {
        config.helmfile.path = file.clone();
    }
    if let Some(env) = &args.environment {
        config.helmfile.environment = env.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.helm.namespace = namespace.clone();
    }
    if let Some(context) = &args.kube_context {
        config.helm.kube_context = context.clone();
    }

    let selector = parse_selector(&args.selectors)?;
    for raw in &args.charts {
        let (original, path) = parse_override(raw)?;
        let resolved = ctx.registry.add_chart(&original, &path)?;
        info!(original = %original, local_path = %resolved.display(), "chart substitution registered");
    }
    for raw in &args.images {
        let (original, replacement) = parse_override(raw)?;
        ctx.registry.add_image(&original, &replacement)?;
        info!(original = %original, replacement = %replacement, "image substitution registered");
    }

    let units = Arc::new(
        UnitStore::load(&config.helmfile.path, &config.helmfile.environment)
            .context("failed to load helmfile")?,
    );
    let helm = Arc::new(HelmCli::new(config.helm.settings(), Arc::clone(&ctx.registry)));
    let mode = if args.dry_run {
        DeployMode::DryRun
    } else {
        DeployMode::Apply
    };

    let report = sync_once(&units, &helm, &selector, mode).await?;
    print_summary(&report);

    let long_running = args.watch || args.drift_detect;
    if !long_running {
        if !report.is_success() {
            bail!("{} release(s) failed to sync", report.failed.len());
        }
        return Ok(());
    }
    if !report.is_success() {
        warn!(failed = report.failed.len(), "initial sync had failures");
    }

    let (trigger, token) = shutdown::channel();
    let scheduler = if args.drift_detect {
        let drift = drift_config(&config.drift, &args)?;
        let scheduler = DriftScheduler::new(units.clone(), helm.clone(), drift.interval())
            .with_default_namespace(&config.helm.namespace);
        for notifier in build_notifiers(&drift) {
            scheduler.add_notifier(notifier);
        }
        if drift.auto_heal {
            scheduler.enable_auto_heal(true, heal_with(Arc::clone(&units), helm.clone()));
        }
        scheduler.start(token)?;

        output::success("Drift detector running...");
        output::field("Interval", format!("{:?}", drift.interval()));
        output::field("Auto-heal", drift.auto_heal);
        if let Some(url) = &drift.webhook_url {
            output::field("Webhook", url);
        }
        Some(scheduler)
    } else {
        None
    };

    let outcome = if args.watch {
        watch(&units, &helm, &selector, mode).await
    } else {
        println!("Press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")
    };

    trigger.trigger();
    if let Some(scheduler) = scheduler {
        scheduler.stop().await?;
    }
    outcome
}

fn drift_config(base: &DriftConfig, args: &SyncArgs) -> Result<DriftConfig> {
    let mut drift = base.clone();
    drift.interval_secs = interval_secs(parse_duration(&args.drift_interval)?);
    if drift.interval_secs == 0 {
        bail!("--drift-detect needs a non-zero --drift-interval");
    }
    drift.auto_heal |= args.drift_auto_heal;
    if let Some(url) = &args.drift_webhook {
        drift.webhook_url = Some(url.clone());
    }
    if let Some(path) = &args.drift_file {
        drift.report_file = Some(path.clone());
    }
    Ok(drift)
}

/// Sync repositories, then the selected releases, off the async runtime.
async fn sync_once(
    units: &Arc<UnitStore>,
    helm: &Arc<HelmCli>,
    selector: &HashMap<String, String>,
    mode: DeployMode,
) -> Result<SyncReport> {
    let units = Arc::clone(units);
    let helm = Arc::clone(helm);
    let selector = selector.clone();
    tokio::task::spawn_blocking(move || -> Result<SyncReport> {
        helm.sync_repositories(&units.repositories())
            .context("failed to sync repositories")?;
        let selected = units.filter(&selector);
        if selected.is_empty() {
            warn!("no releases match the selector");
        }
        Ok(sync_units(&selected, helm.as_ref(), mode))
    })
    .await
    .context("sync task panicked")?
}

fn print_summary(report: &SyncReport) {
    let mut line = format!("{} synced", report.synced.len());
    if !report.skipped.is_empty() {
        line.push_str(&format!(", {} skipped", report.skipped.len()));
    }
    if report.failed.is_empty() {
        println!("{}", line.bright_green());
    } else {
        line.push_str(&format!(", {} failed", report.failed.len()));
        println!("{}", line.bright_red());
    }
}

/// Re-sync whenever the helmfile changes, until Ctrl+C.
async fn watch(
    units: &Arc<UnitStore>,
    helm: &Arc<HelmCli>,
    selector: &HashMap<String, String>,
    mode: DeployMode,
) -> Result<()> {
    let path = units.path().to_path_buf();
    let file_name = path
        .file_name()
        .with_context(|| format!("invalid helmfile path {}", path.display()))?
        .to_os_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })
    .context("failed to create file watcher")?;
    // The directory is watched so editors that replace the file are still seen.
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    output::success(&format!("Watching {} for changes", path.display()));
    println!("Press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl+C")?;
                break;
            }
            event = rx.recv() => {
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!(error = %e, "file watcher error");
                        continue;
                    }
                    None => break,
                };
                if !is_helmfile_event(&event, &file_name) {
                    continue;
                }

                tokio::time::sleep(WATCH_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}

                info!(file = %path.display(), "helmfile changed");
                match units.reload() {
                    Ok(count) => {
                        output::success(&format!("Helmfile reloaded: {} releases", count));
                        match sync_once(units, helm, selector, mode).await {
                            Ok(report) => print_summary(&report),
                            Err(e) => output::failure(&format!("Sync failed: {:#}", e)),
                        }
                    }
                    Err(e) => output::failure(&format!("Failed to reload helmfile: {}", e)),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmfire_common::{HelmfireError, Result as HelmResult};
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, DeployMode)>>,
        failing: Vec<String>,
    }

    impl UnitDeployer for Recorder {
        fn deploy(&self, unit: &ManagedUnit, mode: DeployMode) -> HelmResult<()> {
            self.calls.lock().unwrap().push((unit.name.clone(), mode));
            if self.failing.contains(&unit.name) {
                return Err(HelmfireError::collaborator(&unit.name, "upgrade failed"));
            }
            Ok(())
        }
    }

    fn unit(name: &str, installed: Option<bool>) -> ManagedUnit {
        ManagedUnit {
            name: name.to_string(),
            chart: format!("bitnami/{}", name),
            installed,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("bitnami/nginx=./charts/nginx").unwrap(),
            ("bitnami/nginx".to_string(), "./charts/nginx".to_string())
        );
        // only the first '=' separates
        assert_eq!(
            parse_override("nginx:1.25=registry/nginx:a=b").unwrap().1,
            "registry/nginx:a=b"
        );
        assert!(parse_override("bitnami/nginx").is_err());
        assert!(parse_override("=./charts").is_err());
        assert!(parse_override("bitnami/nginx=").is_err());
    }

    #[test]
    fn test_sync_units_continues_after_failure() {
        let deployer = Recorder {
            failing: vec!["redis".to_string()],
            ..Default::default()
        };
        let units = vec![
            unit("redis", None),
            unit("legacy", Some(false)),
            unit("nginx", Some(true)),
        ];

        let report = sync_units(&units, &deployer, DeployMode::DryRun);
        assert_eq!(report.synced, vec!["nginx".to_string()]);
        assert_eq!(report.skipped, vec!["legacy".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "redis");
        assert!(!report.is_success());

        let calls = deployer.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, mode)| *mode == DeployMode::DryRun));
    }

    #[test]
    fn test_helmfile_event_filter() {
        let name = OsStr::new("helmfile.yaml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/work/helmfile.yaml"));
        assert!(is_helmfile_event(&modify, name));

        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/work/helmfile.yaml"));
        assert!(is_helmfile_event(&create, name));

        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/work/values.yaml"));
        assert!(!is_helmfile_event(&other, name));

        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/work/helmfile.yaml"));
        assert!(!is_helmfile_event(&access, name));
    }

    #[test]
    fn test_drift_config_from_flags() {
        let args = SyncArgs {
            drift_interval: "500ms".to_string(),
            drift_auto_heal: true,
            drift_webhook: Some("http://hooks.local/drift".to_string()),
            ..Default::default()
        };
        let drift = drift_config(&DriftConfig::default(), &args).unwrap();
        assert_eq!(drift.interval_secs, 1);
        assert!(drift.auto_heal);
        assert_eq!(drift.webhook_url.as_deref(), Some("http://hooks.local/drift"));

        for bad in ["soon", "0"] {
            let args = SyncArgs {
                drift_interval: bad.to_string(),
                ..Default::default()
            };
            assert!(drift_config(&DriftConfig::default(), &args).is_err());
        }
    }
}
