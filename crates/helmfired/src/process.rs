//! Process handles for liveness checks and termination.
//!
//! Lock-file logic only talks to `ProcessTable`/`ProcessHandle`, so tests
//! can substitute fake processes.

use helmfire_common::Result;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;

pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    /// Probe without delivering a signal.
    fn is_alive(&self) -> bool;

    /// Ask the process to exit.
    fn terminate(&self) -> Result<()>;

    /// Force the process to exit.
    fn kill(&self) -> Result<()>;
}

/// Resolves process identifiers to handles.
pub trait ProcessTable: Send + Sync {
    fn open(&self, pid: u32) -> Box<dyn ProcessHandle>;
}

/// The real OS process table (signals via nix).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    fn open(&self, pid: u32) -> Box<dyn ProcessHandle> {
        Box::new(OsProcess { pid })
    }
}

#[derive(Debug)]
struct OsProcess {
    pid: u32,
}

impl OsProcess {
    /// `None` for ids that would address a process group instead of one process.
    fn target(&self) -> Option<Pid> {
        i32::try_from(self.pid)
            .ok()
            .filter(|pid| *pid > 0)
            .map(Pid::from_raw)
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.target() else {
            return Ok(());
        };
        match kill(pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e).into()),
        }
    }
}

impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        let Some(pid) = self.target() else {
            return false;
        };
        // EPERM: the process exists but belongs to someone else.
        matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
    }

    fn terminate(&self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    fn kill(&self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }
}
