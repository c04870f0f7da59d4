//! helmfired - live-override and drift-monitoring daemon for helmfile releases.

pub mod args;
pub mod drift;
pub mod lockfile;
pub mod logging;
pub mod process;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod supervisor;

pub use supervisor::{Daemon, Phase};
