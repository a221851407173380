//! Health monitoring.
//!
//! Each tick probes the database, the cache backend, the business metrics
//! and the payment pipeline, runs the rule engine, and folds everything
//! into a single [`HealthReport`] with a composite score. The scoring
//! itself is a pure function over the check results and active alerts, so
//! it is trivially testable without any async plumbing.
//!
//! The background ticker is idempotent: `start` on a running monitor is a
//! no-op, `stop` on a stopped one is a no-op, and a `start`/`stop` pair
//! always leaves exactly zero background tasks behind.

use crate::alert::Alert;
use crate::backend::CacheBackend;
use crate::cache::{CacheStats, SubscriptionCache};
use crate::clock::{Clock, SystemClock};
use crate::rules::{RuleEngine, TickMetrics};
use crate::store::SubscriptionStore;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Score deduction per unhealthy component.
const UNHEALTHY_COMPONENT_PENALTY: u32 = 25;
/// Score deduction per recorded issue.
const ISSUE_PENALTY: u32 = 5;

/// Tunables for the periodic health checks.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Interval between background ticks.
    pub check_interval: Duration,
    /// Database round-trip latency above this is flagged as an issue.
    pub db_latency_warn: Duration,
    /// Cache memory pressure (used/max) above this is flagged.
    pub memory_pressure_warn: f64,
    /// Churn percentage above this is flagged.
    pub churn_warn_pct: f64,
    /// Payment success percentage below this is flagged.
    pub payment_success_warn_pct: f64,
    /// Trailing window for the business and payment aggregates.
    pub metrics_window: Duration,
    /// Overall health additionally requires the score to reach this floor.
    pub score_floor: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            check_interval: Duration::from_secs(300),
            db_latency_warn: Duration::from_millis(250),
            memory_pressure_warn: 0.85,
            churn_warn_pct: 5.0,
            payment_success_warn_pct: 95.0,
            metrics_window: Duration::from_secs(3600),
            score_floor: 70,
        }
    }
}

/// Result of one component's check.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl ComponentHealth {
    fn ok(name: &str) -> Self {
        ComponentHealth {
            name: name.to_string(),
            healthy: true,
            issues: Vec::new(),
        }
    }
}

/// Composite verdict for the whole system.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct OverallHealth {
    pub healthy: bool,
    pub score: u8,
}

/// Snapshot produced by one monitoring tick.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    /// Unix epoch seconds at the start of the tick.
    pub timestamp: u64,
    pub overall: OverallHealth,
    pub components: Vec<ComponentHealth>,
    pub cache: CacheStats,
    /// Unresolved alerts at the end of the tick, newest first.
    pub active_alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

/// Composite health score in `[0, 100]`.
///
/// Starts at 100 and deducts 25 per unhealthy component, 5 per recorded
/// issue, and each active alert's severity penalty. Pure function: the
/// same inputs always score the same.
pub fn health_score(components: &[ComponentHealth], active_alerts: &[Alert]) -> u8 {
    let mut deductions: u32 = 0;

    for component in components {
        if !component.healthy {
            deductions += UNHEALTHY_COMPONENT_PENALTY;
        }
        deductions += component.issues.len() as u32 * ISSUE_PENALTY;
    }
    for alert in active_alerts {
        deductions += alert.severity.score_penalty();
    }

    100u32.saturating_sub(deductions) as u8
}

/// One component check plus the advice it produced.
struct CheckOutcome {
    component: ComponentHealth,
    recommendations: Vec<String>,
}

impl CheckOutcome {
    fn healthy(name: &str) -> Self {
        CheckOutcome {
            component: ComponentHealth::ok(name),
            recommendations: Vec::new(),
        }
    }

    fn issue(&mut self, issue: impl Into<String>, recommendation: impl Into<String>) {
        self.component.issues.push(issue.into());
        self.recommendations.push(recommendation.into());
    }

    fn fail(&mut self, issue: impl Into<String>, recommendation: impl Into<String>) {
        self.component.healthy = false;
        self.issue(issue, recommendation);
    }
}

/// Periodic health checker over the cache, the store and the rule engine.
///
/// Cheap to clone; clones share the ticker handle and the latest report.
pub struct HealthMonitor<B: CacheBackend + 'static, S: SubscriptionStore + 'static> {
    cache: SubscriptionCache<B>,
    store: Arc<S>,
    engine: Arc<RuleEngine<S>>,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    latest: Arc<RwLock<Option<HealthReport>>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<B: CacheBackend + 'static, S: SubscriptionStore + 'static> Clone for HealthMonitor<B, S> {
    fn clone(&self) -> Self {
        HealthMonitor {
            cache: self.cache.clone(),
            store: self.store.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            latest: self.latest.clone(),
            ticker: self.ticker.clone(),
        }
    }
}

impl<B: CacheBackend + 'static, S: SubscriptionStore + 'static> HealthMonitor<B, S> {
    pub fn new(
        cache: SubscriptionCache<B>,
        store: Arc<S>,
        engine: Arc<RuleEngine<S>>,
        config: MonitorConfig,
    ) -> Self {
        Self::with_clock(cache, store, engine, config, Arc::new(SystemClock))
    }

    /// Monitor with an injected clock (tests).
    pub fn with_clock(
        cache: SubscriptionCache<B>,
        store: Arc<S>,
        engine: Arc<RuleEngine<S>>,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        HealthMonitor {
            cache,
            store,
            engine,
            config,
            clock,
            latest: Arc::new(RwLock::new(None)),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// The rule engine, for registering rules and resolving alerts.
    pub fn engine(&self) -> &Arc<RuleEngine<S>> {
        &self.engine
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    // ========================================================================
    // Component checks
    // ========================================================================

    async fn check_database(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::healthy("database");

        match self.store.ping().await {
            Ok(latency) => {
                if latency > self.config.db_latency_warn {
                    outcome.issue(
                        format!(
                            "query latency {}ms above {}ms",
                            latency.as_millis(),
                            self.config.db_latency_warn.as_millis()
                        ),
                        "Check store load and slow queries on the subscription collections",
                    );
                }
            }
            Err(e) => outcome.fail(
                format!("unreachable: {}", e),
                "Verify database connectivity and credentials",
            ),
        }

        outcome
    }

    async fn check_cache(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::healthy("cache");

        match self.cache.backend().ping().await {
            Ok(true) => {
                // Reachable; memory pressure is the remaining concern
                if let Ok(usage) = self.cache.backend().memory_usage().await {
                    if let Some(pressure) = usage.pressure() {
                        if pressure > self.config.memory_pressure_warn {
                            outcome.issue(
                                format!("memory pressure at {:.0}%", pressure * 100.0),
                                "Raise the cache memory ceiling or shorten TTLs",
                            );
                        }
                    }
                }
            }
            Ok(false) => outcome.fail(
                "ping returned unhealthy",
                "Inspect the cache backend server state",
            ),
            Err(e) => outcome.fail(
                format!("unreachable: {}", e),
                "Verify cache backend connectivity; serving from store until it returns",
            ),
        }

        outcome
    }

    async fn check_business(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::healthy("business");

        match self.store.churn_stats(self.config.metrics_window).await {
            Ok(stats) => {
                let churn = stats.churn_rate_pct();
                if churn > self.config.churn_warn_pct {
                    outcome.issue(
                        format!(
                            "churn rate {:.1}% above {:.1}%",
                            churn, self.config.churn_warn_pct
                        ),
                        "Review recent cancellations for a common cause",
                    );
                }
                if stats.growth_rate_pct() < 0.0 {
                    outcome.issue(
                        "subscription base shrinking",
                        "Compare signups against cancellations over the window",
                    );
                }
            }
            Err(e) => outcome.fail(
                format!("aggregates unavailable: {}", e),
                "Verify database connectivity and credentials",
            ),
        }

        outcome
    }

    async fn check_payments(&self) -> CheckOutcome {
        let mut outcome = CheckOutcome::healthy("payments");

        match self.store.payment_stats(self.config.metrics_window).await {
            Ok(stats) => {
                let rate = stats.success_rate_pct();
                if rate < self.config.payment_success_warn_pct {
                    outcome.issue(
                        format!(
                            "success rate {:.1}% below {:.1}%",
                            rate, self.config.payment_success_warn_pct
                        ),
                        "Inspect the payment provider dashboard for declined transactions",
                    );
                }
            }
            Err(e) => outcome.fail(
                format!("aggregates unavailable: {}", e),
                "Verify database connectivity and credentials",
            ),
        }

        outcome
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Run one full health check and rule evaluation, returning the report.
    ///
    /// The report is also retained for [`latest_report`](Self::latest_report).
    pub async fn tick(&self) -> HealthReport {
        let timestamp = self.clock.now_secs();
        let cache_stats = self.cache.stats().await;

        let outcomes = vec![
            self.check_database().await,
            self.check_cache().await,
            self.check_business().await,
            self.check_payments().await,
        ];

        self.engine
            .evaluate_tick(TickMetrics {
                cache_hit_rate_pct: cache_stats.hit_rate_pct(),
            })
            .await;

        let mut components = Vec::with_capacity(outcomes.len());
        let mut recommendations = Vec::new();
        for outcome in outcomes {
            components.push(outcome.component);
            recommendations.extend(outcome.recommendations);
        }

        let active_alerts = self.engine.active_alerts();
        let score = health_score(&components, &active_alerts);
        let healthy = score >= self.config.score_floor && components.iter().all(|c| c.healthy);

        let report = HealthReport {
            timestamp,
            overall: OverallHealth { healthy, score },
            components,
            cache: cache_stats,
            active_alerts,
            recommendations,
        };

        if report.overall.healthy {
            debug!("Health check passed: score {}", score);
        } else {
            warn!(
                "Health check degraded: score {}, {} active alerts",
                score,
                report.active_alerts.len()
            );
        }

        *self.latest.write().await = Some(report.clone());
        report
    }

    /// The report from the most recent tick, if any tick has run.
    pub async fn latest_report(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    // ========================================================================
    // Background ticker
    // ========================================================================

    /// Start the background ticker. No-op if it is already running.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock().expect("ticker lock poisoned");
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Health monitor already running");
            return;
        }

        let monitor = self.clone();
        let interval = self.config.check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.tick().await;
            }
        });

        info!("Health monitor started (interval {:?})", interval);
        *ticker = Some(handle);
    }

    /// Stop the background ticker. No-op if it is not running.
    pub fn stop(&self) {
        let handle = self.ticker.lock().expect("ticker lock poisoned").take();
        match handle {
            Some(handle) => {
                handle.abort();
                info!("Health monitor stopped");
            }
            None => debug!("Health monitor not running"),
        }
    }

    /// Whether the background ticker is currently running.
    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .expect("ticker lock poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Severity;
    use crate::backend::InMemoryBackend;
    use crate::clock::ManualClock;
    use crate::dispatch::AlertDispatcher;
    use crate::store::{ChurnStats, InMemoryStore, PaymentStats};
    use std::collections::BTreeMap;

    fn alert(severity: Severity) -> Alert {
        Alert {
            id: "alert-1".to_string(),
            alert_type: "churn_rate".to_string(),
            severity,
            message: "m".to_string(),
            timestamp: 1_000,
            resolved: false,
            metadata: BTreeMap::new(),
        }
    }

    fn monitor_with_backend<B: CacheBackend + 'static>(
        backend: B,
    ) -> (HealthMonitor<B, InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::at(1_000));
        let cache = SubscriptionCache::with_clock(backend, clock.clone());
        let engine = Arc::new(RuleEngine::new(
            Arc::new(store.clone()),
            Arc::new(AlertDispatcher::with_log_channel()),
            clock.clone(),
        ));
        let monitor = HealthMonitor::with_clock(
            cache,
            Arc::new(store.clone()),
            engine,
            MonitorConfig::default(),
            clock,
        );
        (monitor, store)
    }

    fn monitor() -> (HealthMonitor<InMemoryBackend, InMemoryStore>, InMemoryStore) {
        monitor_with_backend(InMemoryBackend::new())
    }

    /// Backend whose transport works but whose server reports unhealthy.
    #[derive(Clone)]
    struct SickPingBackend {
        inner: InMemoryBackend,
    }

    #[async_trait::async_trait]
    impl CacheBackend for SickPingBackend {
        async fn get(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> crate::error::Result<()> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> crate::error::Result<()> {
            self.inner.delete(key).await
        }

        async fn keys_matching(&self, pattern: &str) -> crate::error::Result<Vec<String>> {
            self.inner.keys_matching(pattern).await
        }

        async fn ping(&self) -> crate::error::Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_score_perfect() {
        let components = vec![
            ComponentHealth::ok("database"),
            ComponentHealth::ok("cache"),
        ];
        assert_eq!(health_score(&components, &[]), 100);
    }

    #[test]
    fn test_score_deductions() {
        let components = vec![
            ComponentHealth {
                name: "database".to_string(),
                healthy: false,
                issues: vec!["unreachable".to_string()],
            },
            ComponentHealth::ok("cache"),
        ];
        let alerts = vec![alert(Severity::Critical)];

        // 100 - 25 (unhealthy) - 5 (issue) - 20 (critical alert)
        assert_eq!(health_score(&components, &alerts), 50);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let components: Vec<ComponentHealth> = (0..5)
            .map(|i| ComponentHealth {
                name: format!("c{}", i),
                healthy: false,
                issues: vec!["down".to_string()],
            })
            .collect();
        assert_eq!(health_score(&components, &[alert(Severity::Critical)]), 0);
    }

    #[test]
    fn test_score_monotone_in_issue_count() {
        let mut previous = 100;
        for issues in 1..=30usize {
            let components = vec![ComponentHealth {
                name: "database".to_string(),
                healthy: true,
                issues: vec!["slow".to_string(); issues],
            }];
            let score = health_score(&components, &[]);
            assert!(score <= previous, "score must never rise with more issues");
            assert!(score <= 100);
            previous = score;
        }
        // Deep into the clamp by now
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_score_alert_severity_ordering() {
        let none = health_score(&[], &[]);
        let info = health_score(&[], &[alert(Severity::Info)]);
        let critical = health_score(&[], &[alert(Severity::Critical)]);
        assert!(none > info);
        assert!(info > critical);
    }

    #[tokio::test]
    async fn test_tick_all_healthy() {
        let (monitor, _store) = monitor();

        let report = monitor.tick().await;

        assert_eq!(report.overall.score, 100);
        assert!(report.overall.healthy);
        assert_eq!(report.timestamp, 1_000);
        let names: Vec<&str> = report.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["database", "cache", "business", "payments"]);
        assert!(report.active_alerts.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_tick_database_down() {
        let (monitor, store) = monitor();
        store.set_failing(true);

        let report = monitor.tick().await;

        assert!(!report.overall.healthy);
        let db = &report.components[0];
        assert!(!db.healthy);
        assert!(!db.issues.is_empty());
    }

    #[tokio::test]
    async fn test_tick_cache_unreachable() {
        let backend = InMemoryBackend::new();
        let (monitor, _store) = monitor_with_backend(backend.clone());
        backend.set_failing(true);

        let report = monitor.tick().await;

        let cache = &report.components[1];
        assert_eq!(cache.name, "cache");
        assert!(!cache.healthy);
        // 100 - 25 (unhealthy) - 5 (issue): the score floor alone would
        // pass, the unhealthy component is what fails the verdict
        assert_eq!(report.overall.score, 70);
        assert!(!report.overall.healthy);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("cache backend")));
    }

    #[tokio::test]
    async fn test_tick_cache_ping_unhealthy() {
        let (monitor, _store) = monitor_with_backend(SickPingBackend {
            inner: InMemoryBackend::new(),
        });

        let report = monitor.tick().await;

        let cache = &report.components[1];
        assert!(!cache.healthy);
        assert!(cache.issues[0].contains("ping"));
        assert!(!report.overall.healthy);
    }

    #[tokio::test]
    async fn test_tick_slow_database_is_issue_not_failure() {
        let (monitor, store) = monitor();
        store.set_ping_latency(Duration::from_millis(500));

        let report = monitor.tick().await;

        let db = &report.components[0];
        assert!(db.healthy);
        assert_eq!(db.issues.len(), 1);
        assert_eq!(report.overall.score, 95);
        assert!(report.overall.healthy);
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_tick_flags_churn_and_payments() {
        let (monitor, store) = monitor();
        store.set_churn_stats(ChurnStats {
            cancelled: 10,
            active: 90,
            created: 1,
        });
        store.set_payment_stats(PaymentStats {
            succeeded: 8,
            failed: 2,
        });

        let report = monitor.tick().await;

        let business = &report.components[2];
        // High churn plus shrinking base
        assert_eq!(business.issues.len(), 2);
        let payments = &report.components[3];
        assert_eq!(payments.issues.len(), 1);
        assert_eq!(report.overall.score, 100 - 3 * 5);
    }

    #[tokio::test]
    async fn test_tick_retains_latest_report() {
        let (monitor, _store) = monitor();
        assert!(monitor.latest_report().await.is_none());

        monitor.tick().await;

        let latest = monitor.latest_report().await.expect("report retained");
        assert_eq!(latest.overall.score, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_start_is_idempotent() {
        let (monitor, _store) = monitor();

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        // The interval's first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(monitor.latest_report().await.is_some());

        monitor.stop();
        assert!(!monitor.is_running());
        // Stopping again is a no-op
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_ticks_on_interval() {
        let (monitor, store) = monitor();
        monitor.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = monitor.latest_report().await.expect("first tick ran");
        assert!(first.overall.healthy);

        store.set_failing(true);
        tokio::time::sleep(monitor.config().check_interval + Duration::from_secs(1)).await;

        let second = monitor.latest_report().await.expect("second tick ran");
        assert!(!second.overall.healthy);

        monitor.stop();
    }
}
