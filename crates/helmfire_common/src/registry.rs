//! Substitution registry
//!
//! Chart and image overrides consulted by every helm invocation. Both maps sit
//! behind a single `RwLock` so a snapshot always sees whole writes and so that
//! cross-map snapshots stay atomic.

use crate::error::{HelmfireError, OverrideKind, Result};
use crate::helmfile::ManagedUnit;
use crate::types::{ChartOverride, ImageOverride, SubstitutionCounts, Substitutions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// File that marks a directory as a helm chart.
pub const CHART_MARKER: &str = "Chart.yaml";

#[derive(Debug, Default)]
struct Overrides {
    charts: BTreeMap<String, PathBuf>,
    images: BTreeMap<String, String>,
}

/// Thread-safe registry of chart and image overrides.
#[derive(Debug, Default)]
pub struct SubstitutionRegistry {
    inner: RwLock<Overrides>,
}

impl SubstitutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never leave the maps half-updated, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Overrides> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Overrides> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a local chart directory for `original`, replacing any previous mapping.
    ///
    /// The directory must exist and contain a `Chart.yaml`; the absolute path is stored.
    pub fn add_chart(&self, original: &str, local_path: impl AsRef<Path>) -> Result<PathBuf> {
        if original.trim().is_empty() {
            return Err(HelmfireError::InvalidReference(
                "chart reference cannot be empty".to_string(),
            ));
        }

        let abs_path = validate_chart_dir(local_path.as_ref())?;
        self.write()
            .charts
            .insert(original.to_string(), abs_path.clone());
        Ok(abs_path)
    }

    /// Register an image replacement for `original`, replacing any previous mapping.
    pub fn add_image(&self, original: &str, replacement: &str) -> Result<()> {
        if original.trim().is_empty() || replacement.trim().is_empty() {
            return Err(HelmfireError::InvalidReference(
                "image references cannot be empty".to_string(),
            ));
        }

        self.write()
            .images
            .insert(original.to_string(), replacement.to_string());
        Ok(())
    }

    pub fn remove_chart(&self, original: &str) -> Result<()> {
        match self.write().charts.remove(original) {
            Some(_) => Ok(()),
            None => Err(HelmfireError::NotFound {
                kind: OverrideKind::Chart,
                original: original.to_string(),
            }),
        }
    }

    pub fn remove_image(&self, original: &str) -> Result<()> {
        match self.write().images.remove(original) {
            Some(_) => Ok(()),
            None => Err(HelmfireError::NotFound {
                kind: OverrideKind::Image,
                original: original.to_string(),
            }),
        }
    }

    pub fn resolve_chart(&self, original: &str) -> Option<PathBuf> {
        self.read().charts.get(original).cloned()
    }

    pub fn resolve_image(&self, original: &str) -> Option<String> {
        self.read().images.get(original).cloned()
    }

    /// Copy of `unit` with the chart override applied, if any.
    pub fn effective_unit(&self, unit: &ManagedUnit) -> ManagedUnit {
        let mut effective = unit.clone();
        if let Some(path) = self.resolve_chart(&unit.chart) {
            effective.chart = path.to_string_lossy().into_owned();
        }
        effective
    }

    pub fn list_charts(&self) -> Vec<ChartOverride> {
        chart_entries(&self.read())
    }

    pub fn list_images(&self) -> Vec<ImageOverride> {
        image_entries(&self.read())
    }

    /// Both maps, taken under one read lock.
    pub fn snapshot(&self) -> Substitutions {
        let guard = self.read();
        Substitutions {
            charts: chart_entries(&guard),
            images: image_entries(&guard),
        }
    }

    pub fn counts(&self) -> SubstitutionCounts {
        let guard = self.read();
        SubstitutionCounts {
            charts: guard.charts.len(),
            images: guard.images.len(),
        }
    }
}

fn chart_entries(overrides: &Overrides) -> Vec<ChartOverride> {
    overrides
        .charts
        .iter()
        .map(|(original, path)| ChartOverride {
            original: original.clone(),
            local_path: path.clone(),
        })
        .collect()
}

fn image_entries(overrides: &Overrides) -> Vec<ImageOverride> {
    overrides
        .images
        .iter()
        .map(|(original, replacement)| ImageOverride {
            original: original.clone(),
            replacement: replacement.clone(),
        })
        .collect()
}

/// Resolve `path` to an absolute chart directory or explain why it is not one.
pub fn validate_chart_dir(path: &Path) -> Result<PathBuf> {
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    if !abs_path.exists() {
        return Err(HelmfireError::InvalidPath {
            path: abs_path,
            reason: "local path does not exist".to_string(),
        });
    }
    if !abs_path.is_dir() {
        return Err(HelmfireError::InvalidPath {
            path: abs_path,
            reason: "not a directory".to_string(),
        });
    }
    if !abs_path.join(CHART_MARKER).is_file() {
        return Err(HelmfireError::InvalidPath {
            path: abs_path,
            reason: format!("not a valid chart directory (missing {})", CHART_MARKER),
        });
    }

    Ok(abs_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn chart_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CHART_MARKER),
            "apiVersion: v2\nname: test-chart\nversion: 0.1.0\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_add_and_resolve_chart() {
        let registry = SubstitutionRegistry::new();
        let dir = chart_dir();

        let stored = registry.add_chart("bitnami/nginx", dir.path()).unwrap();
        assert_eq!(stored, dir.path());
        assert_eq!(
            registry.resolve_chart("bitnami/nginx"),
            Some(dir.path().to_path_buf())
        );
        assert_eq!(registry.resolve_chart("bitnami/redis"), None);
    }

    #[test]
    fn test_relative_chart_path_is_stored_absolute() {
        let registry = SubstitutionRegistry::new();
        let dir = chart_dir();
        let cwd = std::env::current_dir().unwrap();
        let relative = pathdiff(dir.path(), &cwd);

        let stored = registry.add_chart("bitnami/nginx", &relative).unwrap();
        assert!(stored.is_absolute());
        assert!(stored.join(CHART_MARKER).is_file());
    }

    // Relative path from `base` to `target` without extra dependencies.
    fn pathdiff(target: &Path, base: &Path) -> PathBuf {
        let depth = base.components().count().saturating_sub(1);
        let mut rel = PathBuf::new();
        for _ in 0..depth {
            rel.push("..");
        }
        rel.join(target.strip_prefix("/").unwrap())
    }

    #[test]
    fn test_add_chart_missing_dir_leaves_registry_unchanged() {
        let registry = SubstitutionRegistry::new();
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = registry.add_chart("bitnami/nginx", &missing).unwrap_err();
        assert!(matches!(err, HelmfireError::InvalidPath { .. }));
        assert!(registry.list_charts().is_empty());
    }

    #[test]
    fn test_add_chart_without_marker_fails() {
        let registry = SubstitutionRegistry::new();
        let dir = TempDir::new().unwrap();

        let err = registry.add_chart("bitnami/nginx", dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing Chart.yaml"));
        assert_eq!(registry.resolve_chart("bitnami/nginx"), None);
    }

    #[test]
    fn test_failed_add_keeps_previous_mapping() {
        let registry = SubstitutionRegistry::new();
        let good = chart_dir();
        let bad = TempDir::new().unwrap();

        registry.add_chart("bitnami/nginx", good.path()).unwrap();
        assert!(registry.add_chart("bitnami/nginx", bad.path()).is_err());
        assert_eq!(
            registry.resolve_chart("bitnami/nginx"),
            Some(good.path().to_path_buf())
        );
    }

    #[test]
    fn test_chart_round_trip_remove() {
        let registry = SubstitutionRegistry::new();
        let dir = chart_dir();

        registry.add_chart("bitnami/nginx", dir.path()).unwrap();
        registry.remove_chart("bitnami/nginx").unwrap();
        assert_eq!(registry.resolve_chart("bitnami/nginx"), None);
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let registry = SubstitutionRegistry::new();
        registry.add_image("redis:7", "redis:7-alpine").unwrap();

        let err = registry.remove_chart("bitnami/nginx").unwrap_err();
        assert!(matches!(
            err,
            HelmfireError::NotFound {
                kind: OverrideKind::Chart,
                ..
            }
        ));
        let err = registry.remove_image("postgres:15").unwrap_err();
        assert!(matches!(
            err,
            HelmfireError::NotFound {
                kind: OverrideKind::Image,
                ..
            }
        ));
        assert_eq!(registry.list_images().len(), 1);
    }

    #[test]
    fn test_add_image_rejects_empty() {
        let registry = SubstitutionRegistry::new();
        assert!(matches!(
            registry.add_image("", "nginx:custom"),
            Err(HelmfireError::InvalidReference(_))
        ));
        assert!(matches!(
            registry.add_image("nginx:1.25", ""),
            Err(HelmfireError::InvalidReference(_))
        ));
        assert!(registry.list_images().is_empty());
    }

    #[test]
    fn test_list_images_single_entry() {
        let registry = SubstitutionRegistry::new();
        registry
            .add_image("postgres:15", "localhost:5000/postgres:custom")
            .unwrap();

        assert_eq!(
            registry.list_images(),
            vec![ImageOverride {
                original: "postgres:15".to_string(),
                replacement: "localhost:5000/postgres:custom".to_string(),
            }]
        );
    }

    #[test]
    fn test_last_write_wins() {
        let registry = SubstitutionRegistry::new();
        registry.add_image("nginx:1.25", "nginx:a").unwrap();
        registry.add_image("nginx:1.25", "nginx:b").unwrap();

        assert_eq!(registry.resolve_image("nginx:1.25").as_deref(), Some("nginx:b"));
        assert_eq!(registry.counts().images, 1);
    }

    #[test]
    fn test_effective_unit() {
        let registry = SubstitutionRegistry::new();
        let dir = chart_dir();
        registry.add_chart("bitnami/nginx", dir.path()).unwrap();

        let unit = ManagedUnit {
            name: "web".to_string(),
            chart: "bitnami/nginx".to_string(),
            ..Default::default()
        };
        let effective = registry.effective_unit(&unit);
        assert_eq!(effective.chart, dir.path().to_string_lossy());
        assert_eq!(unit.chart, "bitnami/nginx");
    }

    #[test]
    fn test_snapshot_covers_both_maps() {
        let registry = SubstitutionRegistry::new();
        let dir = chart_dir();
        registry.add_chart("bitnami/nginx", dir.path()).unwrap();
        registry.add_image("b:1", "b:2").unwrap();
        registry.add_image("a:1", "a:2").unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.charts.len(), 1);
        let originals: Vec<_> = snapshot.images.iter().map(|i| i.original.as_str()).collect();
        assert_eq!(originals, vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_concurrent_add_and_get_image() {
        let registry = Arc::new(SubstitutionRegistry::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let value = format!("registry.local/nginx:w{}-{}", worker, i);
                    registry.add_image("nginx:1.25", &value).unwrap();
                    if let Some(got) = registry.resolve_image("nginx:1.25") {
                        assert!(got.starts_with("registry.local/nginx:w"));
                    }
                    let _ = registry.list_images();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let last = registry.resolve_image("nginx:1.25").unwrap();
        assert!(last.ends_with("-199"));
    }
}
