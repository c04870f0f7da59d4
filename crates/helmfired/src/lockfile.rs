//! PID lock file for single-instance enforcement.
//!
//! A lock only counts when its recorded process is alive, so a lock left by a
//! crashed daemon never blocks a new start.

use crate::process::{OsProcessTable, ProcessTable};
use helmfire_common::{HelmfireError, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DAEMON: &str = "helmfire daemon";

#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded PID, or `None` if there is no lock file.
    pub fn read_pid(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => Err(HelmfireError::LockFile {
                path: self.path.clone(),
                reason: format!("invalid PID '{}'", content.trim()),
            }),
        }
    }

    /// Write `pid` through a temp file and rename, so readers never see a partial lock.
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        let tmp = self.path.with_extension(format!("tmp.{}", pid));
        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            writeln!(file, "{}", pid)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(HelmfireError::LockFile {
                path: self.path.clone(),
                reason: format!("failed to write: {}", e),
            });
        }
        Ok(())
    }

    /// Remove the lock file; a missing file is fine.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the lock for `pid` unless a live process holds it.
    ///
    /// Stale and unreadable locks are overwritten.
    pub fn acquire(&self, pid: u32, table: &dyn ProcessTable) -> Result<()> {
        match self.read_pid() {
            Ok(Some(holder)) if table.open(holder).is_alive() => {
                return Err(HelmfireError::AlreadyRunning(format!(
                    "{} (pid {})",
                    DAEMON, holder
                )));
            }
            Ok(Some(holder)) => {
                info!(pid = holder, file = %self.path.display(), "removing stale lock file");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "ignoring unreadable lock file");
            }
        }
        self.write_pid(pid)
    }
}

/// Whether the daemon recorded in `path` is alive.
pub fn is_running(path: &Path) -> Result<bool> {
    is_running_with(path, &OsProcessTable)
}

pub fn is_running_with(path: &Path, table: &dyn ProcessTable) -> Result<bool> {
    match LockFile::new(path).read_pid()? {
        Some(pid) => Ok(table.open(pid).is_alive()),
        None => Ok(false),
    }
}

/// How long `stop_daemon` waits for a graceful exit.
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    pub timeout: Duration,
    pub poll: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after the termination request
    Terminated(u32),
    /// Had to be force-killed
    Killed(u32),
    /// Lock named a dead process; the lock was removed
    Stale(u32),
}

/// Stop the daemon recorded in `path`: terminate, wait, then kill.
pub fn stop_daemon(path: &Path, policy: StopPolicy) -> Result<StopOutcome> {
    stop_daemon_with(path, &OsProcessTable, policy)
}

pub fn stop_daemon_with(
    path: &Path,
    table: &dyn ProcessTable,
    policy: StopPolicy,
) -> Result<StopOutcome> {
    let lock = LockFile::new(path);
    let pid = lock
        .read_pid()?
        .ok_or_else(|| HelmfireError::NotRunning(DAEMON.to_string()))?;
    let process = table.open(pid);

    if !process.is_alive() {
        lock.remove()?;
        return Ok(StopOutcome::Stale(pid));
    }

    info!(pid, "sending termination signal");
    process.terminate()?;

    let outcome = if wait_for_exit(process.as_ref(), policy) {
        StopOutcome::Terminated(pid)
    } else {
        warn!(pid, timeout = ?policy.timeout, "daemon did not exit, killing");
        process.kill()?;
        wait_for_exit(process.as_ref(), policy);
        StopOutcome::Killed(pid)
    };

    lock.remove()?;
    debug!(file = %path.display(), "lock file removed");
    Ok(outcome)
}

fn wait_for_exit(process: &dyn crate::process::ProcessHandle, policy: StopPolicy) -> bool {
    let deadline = Instant::now() + policy.timeout;
    loop {
        if !process.is_alive() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(policy.poll);
    }
}
