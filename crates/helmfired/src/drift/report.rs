//! Drift reports and their classification.

use chrono::{DateTime, Utc};
use helmfire_common::ManagedUnit;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DETAILS_DETECTED: &str = "Configuration drift detected";
pub const DETAILS_HEALED: &str = "Configuration drift detected and auto-healed";

/// Diffs shorter than this many characters are low severity
const LOW_SEVERITY_LIMIT: usize = 100;
/// Diffs shorter than this many characters are medium severity
const MEDIUM_SEVERITY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftType {
    Configuration,
    Resource,
    Image,
    Deletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriftType::Configuration => "configuration",
            DriftType::Resource => "resource",
            DriftType::Image => "image",
            DriftType::Deletion => "deletion",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

/// One drift observation for one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "releaseName")]
    pub unit_name: String,
    pub namespace: String,
    pub drift_type: DriftType,
    pub severity: Severity,
    pub details: String,
    #[serde(rename = "diff")]
    pub raw_diff: String,
    pub healed: bool,
}

impl DriftReport {
    /// Unhealed report for a non-empty diff of `unit`.
    pub fn detected(unit: &ManagedUnit, namespace: String, diff: String) -> Self {
        Self {
            timestamp: Utc::now(),
            unit_name: unit.name.clone(),
            namespace,
            drift_type: classify_drift(&diff),
            severity: severity_for(&diff),
            details: DETAILS_DETECTED.to_string(),
            raw_diff: diff,
            healed: false,
        }
    }

    pub fn mark_healed(&mut self) {
        self.healed = true;
        self.details = DETAILS_HEALED.to_string();
    }
}

/// Severity from diff size in characters.
pub fn severity_for(diff: &str) -> Severity {
    let len = diff.chars().count();
    if len < LOW_SEVERITY_LIMIT {
        Severity::Low
    } else if len < MEDIUM_SEVERITY_LIMIT {
        Severity::Medium
    } else {
        Severity::High
    }
}

/// Every diff is reported as configuration drift for now.
pub fn classify_drift(_diff: &str) -> DriftType {
    DriftType::Configuration
}
