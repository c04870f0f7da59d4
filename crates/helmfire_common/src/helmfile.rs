//! Helmfile model and loader.
//!
//! The core never mutates a loaded release; it only reads snapshots and derives
//! effective units from them through the substitution registry.

use crate::error::{HelmfireError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// Simplified helmfile.yaml structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelmfileSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub releases: Vec<ManagedUnit>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, Environment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub oci: bool,
}

/// One deployable release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedUnit {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub chart: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set: Vec<SetValue>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl ManagedUnit {
    /// Releases are installed unless they say `installed: false`.
    pub fn is_installed(&self) -> bool {
        self.installed.unwrap_or(true)
    }

    pub fn effective_namespace(&self, default: &str) -> String {
        if !self.namespace.is_empty() {
            self.namespace.clone()
        } else if !default.is_empty() {
            default.to_string()
        } else {
            "default".to_string()
        }
    }

    /// Values entries that are file paths; inline maps are skipped.
    pub fn values_files(&self) -> Vec<String> {
        self.values
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }

    pub fn matches(&self, selector: &HashMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetValue {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub values: Vec<serde_yaml::Value>,
}

impl HelmfileSpec {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Source of the current list of managed units.
pub trait UnitSource: Send + Sync {
    fn units(&self) -> Vec<ManagedUnit>;
}

impl UnitSource for Vec<ManagedUnit> {
    fn units(&self) -> Vec<ManagedUnit> {
        self.clone()
    }
}

/// Loaded helmfile with on-demand reload.
#[derive(Debug)]
pub struct UnitStore {
    path: PathBuf,
    environment: String,
    spec: RwLock<HelmfileSpec>,
}

impl UnitStore {
    /// Read and parse the helmfile at `path`.
    pub fn load(path: impl AsRef<Path>, environment: &str) -> Result<Self> {
        let path = absolute(path.as_ref())?;
        let spec = read_spec(&path)?;
        info!(
            file = %path.display(),
            releases = spec.releases.len(),
            "helmfile loaded"
        );
        Ok(Self {
            path,
            environment: environment.to_string(),
            spec: RwLock::new(spec),
        })
    }

    /// Store with a fixed spec and no backing file.
    pub fn from_spec(spec: HelmfileSpec) -> Self {
        Self {
            path: PathBuf::new(),
            environment: String::new(),
            spec: RwLock::new(spec),
        }
    }

    /// Re-read the helmfile. The previous snapshot stays in place on failure.
    pub fn reload(&self) -> Result<usize> {
        if self.path.as_os_str().is_empty() {
            return Err(HelmfireError::Helmfile(
                "no helmfile path configured".to_string(),
            ));
        }
        let spec = read_spec(&self.path)?;
        let count = spec.releases.len();
        *self.spec.write().unwrap_or_else(PoisonError::into_inner) = spec;
        info!(file = %self.path.display(), releases = count, "helmfile reloaded");
        Ok(count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn with_spec<T>(&self, f: impl FnOnce(&HelmfileSpec) -> T) -> T {
        f(&self.spec.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn releases(&self) -> Vec<ManagedUnit> {
        self.with_spec(|spec| spec.releases.clone())
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.with_spec(|spec| spec.repositories.clone())
    }

    pub fn find(&self, name: &str) -> Option<ManagedUnit> {
        self.with_spec(|spec| spec.releases.iter().find(|r| r.name == name).cloned())
    }

    /// Releases whose labels match every selector pair. An empty selector matches all.
    pub fn filter(&self, selector: &HashMap<String, String>) -> Vec<ManagedUnit> {
        self.with_spec(|spec| {
            spec.releases
                .iter()
                .filter(|r| r.matches(selector))
                .cloned()
                .collect()
        })
    }
}

impl UnitSource for UnitStore {
    fn units(&self) -> Vec<ManagedUnit> {
        self.releases()
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn read_spec(path: &Path) -> Result<HelmfileSpec> {
    debug!(file = %path.display(), "reading helmfile");
    let content = fs::read_to_string(path).map_err(|e| {
        HelmfireError::Helmfile(format!("failed to read {}: {}", path.display(), e))
    })?;
    HelmfileSpec::parse(&content).map_err(|e| {
        HelmfireError::Helmfile(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// Parse label selectors of the form `key=value[,key=value]`.
pub fn parse_selector<S: AsRef<str>>(selectors: &[S]) -> Result<HashMap<String, String>> {
    let mut parsed = HashMap::new();
    for selector in selectors {
        for pair in selector.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                HelmfireError::InvalidConfig(format!("invalid selector '{}': expected key=value", pair))
            })?;
            if key.trim().is_empty() {
                return Err(HelmfireError::InvalidConfig(format!(
                    "invalid selector '{}': empty key",
                    pair
                )));
            }
            parsed.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(parsed)
}
