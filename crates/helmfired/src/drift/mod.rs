//! Drift detection: scheduler, reports and notification sinks.

pub mod notifiers;
pub mod report;
pub mod scheduler;

pub use notifiers::{build_notifiers, ConsoleNotifier, FileNotifier, Notifier, WebhookNotifier};
pub use report::{DriftReport, DriftType, Severity};
pub use scheduler::{heal_with, DriftScheduler, HealFn};
