//! Alerts and the deduplicating alert log.
//!
//! At most one unresolved alert per type exists at any time. The log's
//! mutex serializes the check-then-act of creation so two concurrent ticks
//! cannot race a duplicate into existence.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const SECS_PER_DAY: u64 = 86_400;

/// Alert severity, ordered from least to most severe.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Amount an active alert of this severity subtracts from the
    /// composite health score.
    pub fn score_penalty(&self) -> u32 {
        match self {
            Severity::Critical => 20,
            Severity::Error => 15,
            Severity::Warning => 10,
            Severity::Info => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// A raised alert.
///
/// Created by the rule engine, mutated only via explicit resolution or
/// age-based cleanup of resolved alerts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Dedup key: one unresolved alert per type.
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    /// Unix epoch seconds at creation.
    pub timestamp: u64,
    pub resolved: bool,
    pub metadata: BTreeMap<String, String>,
}

/// In-memory alert registry with per-type dedup.
///
/// Not persisted across restarts; the surrounding application polls and
/// resolves through this registry only.
pub struct AlertLog {
    alerts: Mutex<Vec<Alert>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl AlertLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        AlertLog {
            alerts: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Create an alert unless an unresolved one of the same type exists.
    ///
    /// Returns the new alert, or `None` when deduplicated. The whole
    /// check-then-act runs under the log's mutex.
    pub fn create_if_absent(
        &self,
        alert_type: &str,
        severity: Severity,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Option<Alert> {
        let mut alerts = self.alerts.lock().expect("alert log lock poisoned");

        if alerts.iter().any(|a| !a.resolved && a.alert_type == alert_type) {
            debug!("Alert of type {} already active, deduplicated", alert_type);
            return None;
        }

        let id = format!("alert-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let alert = Alert {
            id,
            alert_type: alert_type.to_string(),
            severity,
            message: message.to_string(),
            timestamp: self.clock.now_secs(),
            resolved: false,
            metadata,
        };

        info!(
            "Alert raised [{}] {}: {}",
            severity.as_str(),
            alert_type,
            message
        );
        alerts.push(alert.clone());
        Some(alert)
    }

    /// All unresolved alerts, newest first.
    pub fn active(&self) -> Vec<Alert> {
        let alerts = self.alerts.lock().expect("alert log lock poisoned");
        let mut active: Vec<Alert> = alerts.iter().filter(|a| !a.resolved).cloned().collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        active
    }

    /// Every alert, resolved or not.
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.lock().expect("alert log lock poisoned").clone()
    }

    /// Mark an alert resolved. Returns false if the id is unknown or the
    /// alert was already resolved.
    pub fn resolve(&self, id: &str) -> bool {
        let mut alerts = self.alerts.lock().expect("alert log lock poisoned");
        match alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                info!("Alert {} ({}) resolved", alert.id, alert.alert_type);
                true
            }
            None => false,
        }
    }

    /// Delete resolved alerts older than `days`.
    ///
    /// Unresolved alerts are never auto-deleted regardless of age; recent
    /// resolved alerts stay for dashboards. Returns the number removed.
    pub fn clear_old(&self, days: u64) -> usize {
        let cutoff = self.clock.now_secs().saturating_sub(days * SECS_PER_DAY);
        let mut alerts = self.alerts.lock().expect("alert log lock poisoned");

        let before = alerts.len();
        alerts.retain(|a| !(a.resolved && a.timestamp < cutoff));
        let removed = before - alerts.len();

        if removed > 0 {
            info!("Cleared {} resolved alerts older than {} days", removed, days);
        }
        removed
    }
}
