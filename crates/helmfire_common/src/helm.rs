//! External helm collaborators.
//!
//! The drift scheduler and the sync paths only see the `UnitDiffer` and
//! `UnitDeployer` traits; `HelmCli` is the implementation that shells out to
//! the helm binary with registry overrides applied.

use crate::error::{HelmfireError, Result};
use crate::helmfile::{ManagedUnit, Repository};
use crate::registry::SubstitutionRegistry;
use crate::types::ImageOverride;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Exit code `helm diff --detailed-exitcode` uses to signal differences.
const DIFF_CHANGES_EXIT_CODE: i32 = 2;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Computes the difference between desired and deployed state of a unit.
pub trait UnitDiffer: Send + Sync {
    /// Empty output means no drift.
    fn diff(&self, unit: &ManagedUnit) -> Result<String>;
}

/// Applies the desired state of a unit.
pub trait UnitDeployer: Send + Sync {
    fn deploy(&self, unit: &ManagedUnit, mode: DeployMode) -> Result<()>;
}

/// Makes chart repositories available before deploying.
pub trait RepositorySyncer: Send + Sync {
    fn sync_repositories(&self, repos: &[Repository]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    Apply,
    DryRun,
}

/// Settings for helm invocations
#[derive(Debug, Clone)]
pub struct HelmSettings {
    pub binary: String,
    /// Namespace for releases that do not name one.
    pub namespace: String,
    pub kube_context: String,
    pub timeout: Duration,
}

impl Default for HelmSettings {
    fn default() -> Self {
        Self {
            binary: "helm".to_string(),
            namespace: String::new(),
            kube_context: String::new(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Output of a finished helm command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Helm CLI collaborator with registry overrides applied to every call.
pub struct HelmCli {
    settings: HelmSettings,
    registry: Arc<SubstitutionRegistry>,
}

impl HelmCli {
    pub fn new(settings: HelmSettings, registry: Arc<SubstitutionRegistry>) -> Self {
        Self { settings, registry }
    }

    pub fn settings(&self) -> &HelmSettings {
        &self.settings
    }

    /// Arguments for `helm upgrade --install`, chart override already applied.
    pub fn upgrade_args(
        &self,
        unit: &ManagedUnit,
        mode: DeployMode,
        post_renderer: Option<&Path>,
    ) -> Vec<String> {
        let effective = self.registry.effective_unit(unit);
        let namespace = effective.effective_namespace(&self.settings.namespace);

        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            effective.name.clone(),
            effective.chart.clone(),
            "--namespace".to_string(),
            namespace,
            "--create-namespace".to_string(),
        ];
        self.push_context(&mut args);
        if !effective.version.is_empty() {
            args.push("--version".to_string());
            args.push(effective.version.clone());
        }
        if effective.wait {
            args.push("--wait".to_string());
        }
        for file in effective.values_files() {
            args.push("-f".to_string());
            args.push(file);
        }
        for set in &effective.set {
            args.push("--set".to_string());
            args.push(format!("{}={}", set.name, set.value));
        }
        if mode == DeployMode::DryRun {
            args.push("--dry-run".to_string());
        }
        if let Some(script) = post_renderer {
            args.push("--post-renderer".to_string());
            args.push(script.to_string_lossy().into_owned());
        }
        args
    }

    /// Arguments for `helm diff upgrade`, chart override already applied.
    pub fn diff_args(&self, unit: &ManagedUnit, post_renderer: Option<&Path>) -> Vec<String> {
        let effective = self.registry.effective_unit(unit);
        let namespace = effective.effective_namespace(&self.settings.namespace);

        let mut args = vec![
            "diff".to_string(),
            "upgrade".to_string(),
            effective.name.clone(),
            effective.chart.clone(),
            "--namespace".to_string(),
            namespace,
            "--allow-unreleased".to_string(),
            "--detailed-exitcode".to_string(),
        ];
        self.push_context(&mut args);
        if !effective.version.is_empty() {
            args.push("--version".to_string());
            args.push(effective.version.clone());
        }
        for file in effective.values_files() {
            args.push("--values".to_string());
            args.push(file);
        }
        for set in &effective.set {
            args.push("--set".to_string());
            args.push(format!("{}={}", set.name, set.value));
        }
        if let Some(script) = post_renderer {
            args.push("--post-renderer".to_string());
            args.push(script.to_string_lossy().into_owned());
        }
        args
    }

    fn push_context(&self, args: &mut Vec<String>) {
        if !self.settings.kube_context.is_empty() {
            args.push("--kube-context".to_string());
            args.push(self.settings.kube_context.clone());
        }
    }

    /// Post-renderer for the current image overrides, if there are any.
    fn post_renderer(&self) -> Result<Option<PostRenderer>> {
        let images = self.registry.list_images();
        if images.is_empty() {
            return Ok(None);
        }
        PostRenderer::create(&images).map(Some)
    }

    fn run(&self, unit: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(release = unit, args = ?args, "executing helm command");
        run_with_timeout(&self.settings.binary, args, self.settings.timeout)
            .map_err(|e| {
                HelmfireError::collaborator(
                    unit,
                    format!("failed to run {}: {}", self.settings.binary, e),
                )
            })?
            .ok_or_else(|| {
                HelmfireError::collaborator(
                    unit,
                    format!(
                        "helm command timed out after {}s",
                        self.settings.timeout.as_secs()
                    ),
                )
            })
    }
}

impl UnitDiffer for HelmCli {
    fn diff(&self, unit: &ManagedUnit) -> Result<String> {
        let renderer = self.post_renderer()?;
        let args = self.diff_args(unit, renderer.as_ref().map(PostRenderer::path));
        let output = self.run(&unit.name, &args)?;

        match output.code {
            Some(0) => Ok(String::new()),
            Some(DIFF_CHANGES_EXIT_CODE) if output.stdout.is_empty() => {
                Err(HelmfireError::collaborator(
                    &unit.name,
                    "helm diff reported changes but printed no diff",
                ))
            }
            Some(DIFF_CHANGES_EXIT_CODE) => Ok(output.stdout),
            _ => Err(HelmfireError::collaborator(
                &unit.name,
                format!(
                    "helm diff failed (exit {}): {}",
                    exit_label(output.code),
                    output.stderr.trim()
                ),
            )),
        }
    }
}

impl UnitDeployer for HelmCli {
    fn deploy(&self, unit: &ManagedUnit, mode: DeployMode) -> Result<()> {
        let renderer = self.post_renderer()?;
        let args = self.upgrade_args(unit, mode, renderer.as_ref().map(PostRenderer::path));

        info!(
            release = %unit.name,
            chart = %args[3],
            dry_run = mode == DeployMode::DryRun,
            "syncing release"
        );

        let output = self.run(&unit.name, &args)?;
        if !output.success() {
            error!(
                release = %unit.name,
                stderr = %output.stderr.trim(),
                "helm upgrade failed"
            );
            return Err(HelmfireError::collaborator(
                &unit.name,
                format!(
                    "helm upgrade failed (exit {}): {}",
                    exit_label(output.code),
                    output.stderr.trim()
                ),
            ));
        }
        if !output.stdout.trim().is_empty() {
            debug!(release = %unit.name, output = %output.stdout.trim(), "helm output");
        }
        Ok(())
    }
}

impl RepositorySyncer for HelmCli {
    fn sync_repositories(&self, repos: &[Repository]) -> Result<()> {
        let mut added = 0;
        for repo in repos.iter().filter(|r| !r.oci) {
            info!(name = %repo.name, url = %repo.url, "syncing repository");
            let mut args = vec![
                "repo".to_string(),
                "add".to_string(),
                repo.name.clone(),
                repo.url.clone(),
                "--force-update".to_string(),
            ];
            if let Some(username) = &repo.username {
                args.push("--username".to_string());
                args.push(username.clone());
            }
            if let Some(password) = &repo.password {
                args.push("--password".to_string());
                args.push(password.clone());
            }
            let output = self.run(&repo.name, &args)?;
            if !output.success() {
                return Err(HelmfireError::collaborator(
                    &repo.name,
                    format!("failed to add repository: {}", output.stderr.trim()),
                ));
            }
            added += 1;
        }

        if added > 0 {
            let output = self.run("repositories", &["repo".to_string(), "update".to_string()])?;
            if !output.success() {
                return Err(HelmfireError::collaborator(
                    "repositories",
                    format!("failed to update repositories: {}", output.stderr.trim()),
                ));
            }
        }
        Ok(())
    }
}

fn exit_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Run `binary args...`, returning `None` if it did not finish within `timeout`.
pub fn run_with_timeout(
    binary: &str,
    args: &[String],
    timeout: Duration,
) -> io::Result<Option<CommandOutput>> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            kill_quietly(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    Ok(status.map(|status| CommandOutput {
        code: status.code(),
        stdout,
        stderr,
    }))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                warn!(error = %e, "failed to read helm output");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Temporary post-renderer script rewriting image references. Removed on drop.
pub struct PostRenderer {
    path: PathBuf,
}

impl PostRenderer {
    pub fn create(images: &[ImageOverride]) -> Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "helmfire-post-renderer-{}.sh",
            uuid::Uuid::new_v4()
        ));
        fs::write(&path, post_renderer_script(images))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PostRenderer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Shell script that pipes rendered manifests through sed.
///
/// Each override rewrites `image: X` when X is bare (optionally followed by a
/// `#` comment), double-quoted or single-quoted. Flow-style mappings such as
/// `{image: X}` are left alone.
pub fn post_renderer_script(images: &[ImageOverride]) -> String {
    let mut expressions = Vec::with_capacity(images.len() * 4);
    for image in images {
        let from = escape_sed_pattern(&image.original);
        let to = escape_sed_replacement(&image.replacement);
        expressions.push(format!("s/image: {}$/image: {}/", from, to));
        expressions.push(format!(
            "s/image: {}\\([[:space:]][[:space:]]*#.*\\)$/image: {}\\1/",
            from, to
        ));
        expressions.push(format!("s/image: \"{}\"/image: \"{}\"/", from, to));
        expressions.push(format!("s/image: '{}'/image: '{}'/", from, to));
    }

    let args: Vec<String> = expressions
        .iter()
        .map(|e| format!("-e {}", shell_quote(e)))
        .collect();
    format!("#!/bin/sh\nexec sed {}\n", args.join(" "))
}

fn escape_sed_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '/' | '.' | '*' | '[' | ']' | '^' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_sed_replacement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '/' | '&') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
