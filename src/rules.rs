//! Monitoring rule engine.
//!
//! Rules are threshold comparisons over trailing time windows, held in an
//! in-memory registry that is mutable at runtime, no restart needed. Each
//! tick evaluates every enabled rule; a rule that keeps triggering while
//! its alert is unresolved produces no duplicates, because creation goes
//! through the alert log's per-type dedup.

use crate::alert::{Alert, AlertLog, Severity};
use crate::clock::Clock;
use crate::dispatch::AlertDispatcher;
use crate::error::{Error, Result};
use crate::store::SubscriptionStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Metric a rule samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Cancelled fraction of the subscription base over the window (%).
    ChurnRate,
    /// Net subscription growth over the window (%), can be negative.
    GrowthRate,
    /// Payment success percentage over the window.
    PaymentSuccessRate,
    /// Canonical store round-trip latency in milliseconds.
    DatabaseLatencyMs,
    /// Cache hit percentage since process start.
    CacheHitRate,
}

impl MetricKind {
    /// Stable name, also the alert dedup type for rules on this metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::ChurnRate => "churn_rate",
            MetricKind::GrowthRate => "growth_rate",
            MetricKind::PaymentSuccessRate => "payment_success_rate",
            MetricKind::DatabaseLatencyMs => "database_latency_ms",
            MetricKind::CacheHitRate => "cache_hit_rate",
        }
    }
}

/// Comparison operator of a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    LessThan,
    Equals,
}

impl Comparison {
    /// Apply the comparison: `value <op> threshold`.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::Equals => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// A configurable threshold rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: String,
    pub metric: MetricKind,
    pub threshold: f64,
    pub comparison: Comparison,
    /// Trailing window the metric is computed over.
    pub window_minutes: u64,
    pub severity: Severity,
    /// Notification channel names, matched against the dispatcher.
    pub channels: Vec<String>,
    pub enabled: bool,
}

impl MonitoringRule {
    fn window(&self) -> Duration {
        Duration::from_secs(self.window_minutes * 60)
    }
}

/// Inputs a tick supplies that do not come from the canonical store.
///
/// Keeping these explicit makes a tick's evaluation a function of its
/// inputs rather than of hidden engine state.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickMetrics {
    /// Cache hit percentage, from [`crate::cache::CacheStats`].
    pub cache_hit_rate_pct: f64,
}

/// Evaluates rules against store metrics and raises deduplicated alerts.
pub struct RuleEngine<S: SubscriptionStore> {
    store: Arc<S>,
    rules: DashMap<String, MonitoringRule>,
    alerts: Arc<AlertLog>,
    dispatcher: Arc<AlertDispatcher>,
}

impl<S: SubscriptionStore> RuleEngine<S> {
    pub fn new(store: Arc<S>, dispatcher: Arc<AlertDispatcher>, clock: Arc<dyn Clock>) -> Self {
        RuleEngine {
            store,
            rules: DashMap::new(),
            alerts: Arc::new(AlertLog::new(clock)),
            dispatcher,
        }
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Add a rule, replacing any rule with the same id.
    pub fn add_rule(&self, rule: MonitoringRule) {
        info!("Rule {} registered for metric {}", rule.id, rule.metric.as_str());
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Update an existing rule in place. Returns false if the id is unknown.
    pub fn update_rule(&self, rule: MonitoringRule) -> bool {
        match self.rules.get_mut(&rule.id) {
            Some(mut existing) => {
                *existing = rule;
                true
            }
            None => false,
        }
    }

    /// Remove a rule by id. Returns false if the id is unknown.
    pub fn remove_rule(&self, id: &str) -> bool {
        self.rules.remove(id).is_some()
    }

    /// All registered rules, ordered by id.
    pub fn list_rules(&self) -> Vec<MonitoringRule> {
        let mut rules: Vec<MonitoringRule> =
            self.rules.iter().map(|entry| entry.value().clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Current value of a rule's metric over its trailing window.
    ///
    /// # Errors
    /// Returns `Error::RuleEvaluation` wrapping the failed store query.
    pub async fn metric_value(&self, rule: &MonitoringRule, tick: TickMetrics) -> Result<f64> {
        let wrap = |e: Error| Error::RuleEvaluation {
            rule_id: rule.id.clone(),
            message: e.to_string(),
        };

        let value = match rule.metric {
            MetricKind::ChurnRate => self
                .store
                .churn_stats(rule.window())
                .await
                .map_err(wrap)?
                .churn_rate_pct(),
            MetricKind::GrowthRate => self
                .store
                .churn_stats(rule.window())
                .await
                .map_err(wrap)?
                .growth_rate_pct(),
            MetricKind::PaymentSuccessRate => self
                .store
                .payment_stats(rule.window())
                .await
                .map_err(wrap)?
                .success_rate_pct(),
            MetricKind::DatabaseLatencyMs => {
                self.store.ping().await.map_err(wrap)?.as_secs_f64() * 1_000.0
            }
            MetricKind::CacheHitRate => tick.cache_hit_rate_pct,
        };

        Ok(value)
    }

    /// Whether a rule currently triggers.
    ///
    /// # Errors
    /// Returns `Error::RuleEvaluation` if the metric cannot be computed.
    pub async fn evaluate_rule(&self, rule: &MonitoringRule, tick: TickMetrics) -> Result<bool> {
        let value = self.metric_value(rule, tick).await?;
        Ok(rule.comparison.holds(value, rule.threshold))
    }

    /// Evaluate every enabled rule once.
    ///
    /// A rule whose metric cannot be computed is logged and skipped for
    /// this tick only; the remaining rules still run. Newly created alerts
    /// are handed to the dispatcher; delivery failures never affect alert
    /// creation.
    pub async fn evaluate_tick(&self, tick: TickMetrics) {
        for rule in self.list_rules() {
            if !rule.enabled {
                continue;
            }

            let value = match self.metric_value(&rule, tick).await {
                Ok(value) => value,
                Err(e) => {
                    error!("{}", e);
                    continue;
                }
            };

            if !rule.comparison.holds(value, rule.threshold) {
                continue;
            }

            let message = format!(
                "{} is {:.2} (threshold {:.2}, window {}m)",
                rule.metric.as_str(),
                value,
                rule.threshold,
                rule.window_minutes
            );
            let mut metadata = BTreeMap::new();
            metadata.insert("rule_id".to_string(), rule.id.clone());
            metadata.insert("value".to_string(), format!("{:.4}", value));
            metadata.insert("threshold".to_string(), format!("{:.4}", rule.threshold));

            if let Some(alert) =
                self.alerts
                    .create_if_absent(rule.metric.as_str(), rule.severity, &message, metadata)
            {
                // Best effort, at most once; failures are logged per channel
                let _ = self.dispatcher.dispatch(&alert, &rule.channels);
            }
        }
    }

    // ========================================================================
    // Alert queries
    // ========================================================================

    /// Unresolved alerts, newest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active()
    }

    /// Every alert, resolved or not.
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.all()
    }

    /// Mark an alert resolved by id.
    pub fn resolve_alert(&self, id: &str) -> bool {
        self.alerts.resolve(id)
    }

    /// Delete resolved alerts older than `days`; unresolved alerts are
    /// never auto-deleted.
    pub fn clear_old_alerts(&self, days: u64) -> usize {
        self.alerts.clear_old(days)
    }
}
