//! Canonical store collaborator.
//!
//! The `SubscriptionStore` trait decouples the cache and monitoring layers
//! from the application's document store. The cache never owns this data:
//! every miss and every metric sample goes through these queries.
//!
//! The in-memory implementation at the bottom of this module is the mock
//! used across the crate's tests. It counts queries so the batch loader's
//! one-query guarantee can be asserted by call count.

use crate::error::Result;
use crate::model::{Plan, Subscription};
use async_trait::async_trait;
use std::time::Duration;

/// Rolling-window subscription movement counts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChurnStats {
    /// Subscriptions cancelled inside the window.
    pub cancelled: u64,
    /// Subscriptions active at the end of the window.
    pub active: u64,
    /// Subscriptions created inside the window.
    pub created: u64,
}

impl ChurnStats {
    /// Cancelled fraction of the window's subscription base, as a percent.
    pub fn churn_rate_pct(&self) -> f64 {
        let base = self.active + self.cancelled;
        if base == 0 {
            return 0.0;
        }
        self.cancelled as f64 / base as f64 * 100.0
    }

    /// Net growth over the window as a percent of the active base.
    pub fn growth_rate_pct(&self) -> f64 {
        if self.active == 0 {
            return 0.0;
        }
        (self.created as f64 - self.cancelled as f64) / self.active as f64 * 100.0
    }
}

/// Rolling-window payment outcome counts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PaymentStats {
    pub succeeded: u64,
    pub failed: u64,
}

impl PaymentStats {
    /// Success percentage over the window. A window with no transactions
    /// counts as fully successful: there is nothing to alert on.
    pub fn success_rate_pct(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            return 100.0;
        }
        self.succeeded as f64 / total as f64 * 100.0
    }
}

/// Trait for the canonical store.
///
/// Implementations wrap the application's document store (or an in-memory
/// map for tests). All failures surface as `Error::StoreQuery`; there is
/// no fallback below this layer.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fetch a subscription by id.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the query fails
    async fn fetch_subscription(&self, id: &str) -> Result<Option<Subscription>>;

    /// Fetch the single active subscription for a user, plan fields resolved.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the query fails
    async fn fetch_active_for_user(&self, user_id: &str) -> Result<Option<Subscription>>;

    /// Fetch active subscriptions for many users in **one** query.
    ///
    /// The batch loader depends on this being a single round trip; the
    /// default implementation exists only for stores that genuinely cannot
    /// batch and is never the fast path.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the query fails
    async fn fetch_active_for_users(&self, user_ids: &[String]) -> Result<Vec<Subscription>> {
        let mut results = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(sub) = self.fetch_active_for_user(user_id).await? {
                results.push(sub);
            }
        }
        Ok(results)
    }

    /// Fetch a plan by id.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the query fails
    async fn fetch_plan(&self, id: &str) -> Result<Option<Plan>>;

    /// Connectivity probe returning round-trip latency.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn ping(&self) -> Result<Duration>;

    /// Subscription movement counts over the trailing window.
    ///
    /// # Errors
    /// Returns `Err` if the aggregate query fails
    async fn churn_stats(&self, window: Duration) -> Result<ChurnStats>;

    /// Payment outcome counts over the trailing window.
    ///
    /// # Errors
    /// Returns `Err` if the aggregate query fails
    async fn payment_stats(&self, window: Duration) -> Result<PaymentStats>;
}

// ============================================================================
// In-Memory Test Store
// ============================================================================

use crate::error::Error;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory `SubscriptionStore` for tests.
///
/// Counts single and batch queries so cache-aside behavior can be asserted
/// by call count, and can be switched into a failing mode to exercise the
/// `StoreQuery` path.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<InMemoryStoreInner>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    subscriptions: Mutex<HashMap<String, Subscription>>,
    plans: Mutex<HashMap<String, Plan>>,
    churn: Mutex<ChurnStats>,
    payments: Mutex<PaymentStats>,
    ping_latency: Mutex<Duration>,
    failing: Mutex<bool>,
    single_queries: AtomicUsize,
    batch_queries: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subscription, keyed by its id.
    pub fn insert_subscription(&self, sub: Subscription) {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(sub.id.clone(), sub);
    }

    /// Insert or replace a plan.
    pub fn insert_plan(&self, plan: Plan) {
        self.inner
            .plans
            .lock()
            .expect("plans lock poisoned")
            .insert(plan.id.clone(), plan);
    }

    /// Preset the churn aggregates returned for any window.
    pub fn set_churn_stats(&self, stats: ChurnStats) {
        *self.inner.churn.lock().expect("churn lock poisoned") = stats;
    }

    /// Preset the payment aggregates returned for any window.
    pub fn set_payment_stats(&self, stats: PaymentStats) {
        *self.inner.payments.lock().expect("payments lock poisoned") = stats;
    }

    /// Preset the latency reported by `ping`.
    pub fn set_ping_latency(&self, latency: Duration) {
        *self
            .inner
            .ping_latency
            .lock()
            .expect("latency lock poisoned") = latency;
    }

    /// Make every query fail with `StoreQuery` until reset.
    pub fn set_failing(&self, failing: bool) {
        *self.inner.failing.lock().expect("failing lock poisoned") = failing;
    }

    /// Number of single-entity queries issued so far.
    pub fn single_query_count(&self) -> usize {
        self.inner.single_queries.load(Ordering::SeqCst)
    }

    /// Number of batch queries issued so far.
    pub fn batch_query_count(&self) -> usize {
        self.inner.batch_queries.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<()> {
        if *self.inner.failing.lock().expect("failing lock poisoned") {
            return Err(Error::StoreQuery("store set to failing mode".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn fetch_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        self.check_failing()?;
        self.inner.single_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .get(id)
            .cloned())
    }

    async fn fetch_active_for_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        self.check_failing()?;
        self.inner.single_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .values()
            .find(|s| s.user_id == user_id && s.is_active())
            .cloned())
    }

    async fn fetch_active_for_users(&self, user_ids: &[String]) -> Result<Vec<Subscription>> {
        self.check_failing()?;
        self.inner.batch_queries.fetch_add(1, Ordering::SeqCst);
        let subs = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                subs.values()
                    .find(|s| &s.user_id == user_id && s.is_active())
                    .cloned()
            })
            .collect())
    }

    async fn fetch_plan(&self, id: &str) -> Result<Option<Plan>> {
        self.check_failing()?;
        self.inner.single_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .plans
            .lock()
            .expect("plans lock poisoned")
            .get(id)
            .cloned())
    }

    async fn ping(&self) -> Result<Duration> {
        self.check_failing()?;
        Ok(*self
            .inner
            .ping_latency
            .lock()
            .expect("latency lock poisoned"))
    }

    async fn churn_stats(&self, _window: Duration) -> Result<ChurnStats> {
        self.check_failing()?;
        Ok(*self.inner.churn.lock().expect("churn lock poisoned"))
    }

    async fn payment_stats(&self, _window: Duration) -> Result<PaymentStats> {
        self.check_failing()?;
        Ok(*self.inner.payments.lock().expect("payments lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_churn_rate() {
        let stats = ChurnStats {
            cancelled: 5,
            active: 95,
            created: 10,
        };
        assert!((stats.churn_rate_pct() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_churn_rate_empty_base() {
        assert_eq!(ChurnStats::default().churn_rate_pct(), 0.0);
    }

    #[test]
    fn test_growth_rate_can_be_negative() {
        let stats = ChurnStats {
            cancelled: 10,
            active: 100,
            created: 2,
        };
        assert!(stats.growth_rate_pct() < 0.0);
    }

    #[test]
    fn test_payment_success_rate() {
        let stats = PaymentStats {
            succeeded: 8,
            failed: 2,
        };
        assert!((stats.success_rate_pct() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_payment_success_rate_no_transactions() {
        assert_eq!(PaymentStats::default().success_rate_pct(), 100.0);
    }

    #[tokio::test]
    async fn test_store_fetch_by_id() {
        let store = InMemoryStore::new();
        store.insert_subscription(fixtures::subscription("sub_1", "user_1", "p1"));

        let found = store
            .fetch_subscription("sub_1")
            .await
            .expect("Failed to fetch");
        assert_eq!(found.map(|s| s.user_id), Some("user_1".to_string()));
        assert_eq!(store.single_query_count(), 1);
    }

    #[tokio::test]
    async fn test_store_fetch_by_user() {
        let store = InMemoryStore::new();
        store.insert_subscription(fixtures::subscription("sub_1", "user_1", "p1"));

        let found = store
            .fetch_active_for_user("user_1")
            .await
            .expect("Failed to fetch");
        assert_eq!(found.map(|s| s.id), Some("sub_1".to_string()));

        let missing = store
            .fetch_active_for_user("user_2")
            .await
            .expect("Failed to fetch");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_store_batch_counts_one_query() {
        let store = InMemoryStore::new();
        store.insert_subscription(fixtures::subscription("sub_1", "user_1", "p1"));
        store.insert_subscription(fixtures::subscription("sub_2", "user_2", "p1"));

        let results = store
            .fetch_active_for_users(&["user_1".to_string(), "user_2".to_string()])
            .await
            .expect("Failed to fetch batch");

        assert_eq!(results.len(), 2);
        assert_eq!(store.batch_query_count(), 1);
        assert_eq!(store.single_query_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failing_mode() {
        let store = InMemoryStore::new();
        store.set_failing(true);

        let result = store.fetch_plan("p1").await;
        assert!(matches!(result, Err(Error::StoreQuery(_))));

        store.set_failing(false);
        assert!(store.fetch_plan("p1").await.is_ok());
    }
}
