//! Shared types and utilities for helmfire components.

pub mod client;
pub mod config;
pub mod durations;
pub mod error;
pub mod helm;
pub mod helmfile;
pub mod registry;
pub mod types;

pub use error::{HelmfireError, OverrideKind, Result};
pub use helmfile::{ManagedUnit, UnitSource, UnitStore};
pub use registry::SubstitutionRegistry;

/// Version of the helmfire workspace
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
