//! Error types for Helmfire.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which kind of substitution an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Chart,
    Image,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideKind::Chart => write!(f, "chart"),
            OverrideKind::Image => write!(f, "image"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HelmfireError {
    #[error("invalid chart path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{kind} substitution not found: {original}")]
    NotFound { kind: OverrideKind, original: String },

    #[error("{0} already running")]
    AlreadyRunning(String),

    #[error("{0} not running")]
    NotRunning(String),

    #[error("{0} has been stopped and cannot be restarted")]
    Terminated(String),

    #[error("release {unit}: {message}")]
    Collaborator { unit: String, message: String },

    #[error("failed to reach daemon: {0}")]
    Transport(String),

    #[error("daemon returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("helmfile error: {0}")]
    Helmfile(String),

    #[error("lock file {}: {reason}", path.display())]
    LockFile { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HelmfireError {
    /// HTTP status the control API answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HelmfireError::InvalidPath { .. }
            | HelmfireError::InvalidReference(_)
            | HelmfireError::InvalidConfig(_)
            | HelmfireError::Json(_) => 400,
            HelmfireError::NotFound { .. } => 404,
            HelmfireError::AlreadyRunning(_)
            | HelmfireError::NotRunning(_)
            | HelmfireError::Terminated(_) => 409,
            HelmfireError::Api { status, .. } => *status,
            HelmfireError::Collaborator { .. }
            | HelmfireError::Transport(_)
            | HelmfireError::Helmfile(_)
            | HelmfireError::LockFile { .. }
            | HelmfireError::Io(_)
            | HelmfireError::Yaml(_)
            | HelmfireError::Toml(_) => 500,
        }
    }

    /// Validation and not-found errors are the caller's problem, not a system failure.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            HelmfireError::InvalidPath { .. }
                | HelmfireError::InvalidReference(_)
                | HelmfireError::InvalidConfig(_)
                | HelmfireError::NotFound { .. }
        )
    }

    pub fn collaborator(unit: &str, message: impl Into<String>) -> Self {
        HelmfireError::Collaborator {
            unit: unit.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HelmfireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = HelmfireError::InvalidReference("empty".to_string());
        assert_eq!(err.status_code(), 400);
        assert!(err.is_caller_error());

        let err = HelmfireError::NotFound {
            kind: OverrideKind::Image,
            original: "nginx:1.25".to_string(),
        };
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "image substitution not found: nginx:1.25");

        let err = HelmfireError::AlreadyRunning("drift scheduler".to_string());
        assert_eq!(err.status_code(), 409);
        assert!(!err.is_caller_error());

        let err = HelmfireError::collaborator("nginx", "helm diff failed");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "release nginx: helm diff failed");
    }
}
