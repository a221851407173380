//! Subscription cache manager.
//!
//! Owns the four key namespaces, the per-namespace TTLs, and cascading
//! invalidation. This layer is the degradation boundary: the backend
//! reports failures via `Err`, and every one of them is converted here into
//! a plain miss or no-op. Callers never observe cache failures; a lost
//! Redis connection lowers the hit rate, nothing more.
//!
//! # TTL layering
//!
//! Feature-access entries (900 s) expire well before the subscriptions
//! (1800 s) and plans (7200 s) they are derived from. That bounds the
//! entitlement staleness window even if a cascading invalidation is ever
//! missed.

use crate::backend::{CacheBackend, PipelineOp};
use crate::clock::{Clock, SystemClock};
use crate::key::{
    CacheKey, NS_FEATURE_ACCESS, NS_PLAN, NS_SUBSCRIPTION, NS_USER_SUBSCRIPTION,
};
use crate::model::{CacheRecord, FeatureAccess, Plan, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// TTL for subscription entries and user pointers.
pub const SUBSCRIPTION_TTL: Duration = Duration::from_secs(1800);
/// TTL for plan entries.
pub const PLAN_TTL: Duration = Duration::from_secs(7200);
/// TTL for derived feature-access flags. Deliberately the shortest.
pub const FEATURE_ACCESS_TTL: Duration = Duration::from_secs(900);

/// Live key counts per namespace plus hit/miss counters.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CacheStats {
    pub subscriptions: usize,
    pub user_pointers: usize,
    pub plans: usize,
    pub feature_access: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit percentage since process start. 100 when nothing was asked yet.
    pub fn hit_rate_pct(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 100.0;
        }
        self.hits as f64 / total as f64 * 100.0
    }
}

/// Cache manager for subscriptions, plans and feature-access flags.
///
/// Cheap to clone; clones share the backend and counters.
#[derive(Clone)]
pub struct SubscriptionCache<B: CacheBackend> {
    backend: B,
    clock: Arc<dyn Clock>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl<B: CacheBackend> SubscriptionCache<B> {
    /// Create a manager over the given backend with the system clock.
    pub fn new(backend: B) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Create a manager with an injected clock (tests).
    pub fn with_clock(backend: B, clock: Arc<dyn Clock>) -> Self {
        SubscriptionCache {
            backend,
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Backend reference, for the health monitor's connectivity checks.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Cache a subscription and its `user → subscription id` pointer as one
    /// batched write, both at [`SUBSCRIPTION_TTL`].
    pub async fn cache_subscription(&self, sub: &Subscription) {
        let ops = match Self::subscription_ops(sub) {
            Some(ops) => ops,
            None => return,
        };
        if let Err(e) = self.backend.pipeline(ops).await {
            warn!("Cache unavailable, skipping subscription write: {}", e);
        }
    }

    /// Direct lookup by subscription id. Returns `None` on miss or any
    /// cache failure.
    pub async fn get_cached_subscription(&self, id: &str) -> Option<Subscription> {
        self.get_record(&CacheKey::subscription(id)).await
    }

    /// Two-hop lookup: resolve the user pointer, then the subscription.
    ///
    /// A pointer whose target is absent or expired is treated as a plain
    /// miss; the next cache-aside read repopulates both keys, so the pair
    /// self-heals without surfacing an error. The pair counts as one
    /// logical lookup: exactly one hit or one miss per call, never one
    /// per hop.
    pub async fn get_cached_user_subscription(&self, user_id: &str) -> Option<Subscription> {
        let found = self.resolve_user_subscription(user_id).await;
        self.count_lookup(found.is_some());
        found
    }

    async fn resolve_user_subscription(&self, user_id: &str) -> Option<Subscription> {
        let sub_id: String = self
            .read_record(&CacheKey::user_subscription(user_id))
            .await?;
        match self.read_record(&CacheKey::subscription(&sub_id)).await {
            Some(sub) => Some(sub),
            None => {
                debug!(
                    "Dangling user pointer for {} -> {}, treating as miss",
                    user_id, sub_id
                );
                None
            }
        }
    }

    /// Delete a subscription entry. With `user_id` supplied this also
    /// removes the user pointer and cascades to every feature-access flag
    /// of that user; entitlement staleness is unacceptable.
    pub async fn invalidate_subscription(&self, id: &str, user_id: Option<&str>) {
        let mut keys = vec![CacheKey::subscription(id)];
        if let Some(user_id) = user_id {
            keys.push(CacheKey::user_subscription(user_id));
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        if let Err(e) = self.backend.mdelete(&refs).await {
            warn!("Cache unavailable, skipping subscription invalidation: {}", e);
        }

        if let Some(user_id) = user_id {
            self.invalidate_user_feature_access(user_id).await;
        }
    }

    // ========================================================================
    // Plans
    // ========================================================================

    /// Cache a plan at [`PLAN_TTL`].
    pub async fn cache_plan(&self, plan: &Plan) {
        self.set_record(plan, PLAN_TTL).await;
    }

    /// Lookup a plan by id. Returns `None` on miss or any cache failure.
    pub async fn get_cached_plan(&self, id: &str) -> Option<Plan> {
        self.get_record(&CacheKey::plan(id)).await
    }

    /// Delete a plan entry.
    pub async fn invalidate_plan(&self, id: &str) {
        if let Err(e) = self.backend.delete(&CacheKey::plan(id)).await {
            warn!("Cache unavailable, skipping plan invalidation: {}", e);
        }
    }

    // ========================================================================
    // Feature access
    // ========================================================================

    /// Cache a derived entitlement flag at [`FEATURE_ACCESS_TTL`].
    pub async fn cache_feature_access(&self, user_id: &str, feature: &str, has_access: bool) {
        let record = FeatureAccess {
            user_id: user_id.to_string(),
            feature: feature.to_string(),
            has_access,
            cached_at: self.clock.now_secs(),
        };
        self.set_record(&record, FEATURE_ACCESS_TTL).await;
    }

    /// Lookup an entitlement flag. Returns `None` on miss or any failure.
    pub async fn get_cached_feature_access(
        &self,
        user_id: &str,
        feature: &str,
    ) -> Option<FeatureAccess> {
        self.get_record(&CacheKey::feature_access(user_id, feature))
            .await
    }

    /// Delete every feature-access flag of one user via pattern scan.
    pub async fn invalidate_user_feature_access(&self, user_id: &str) {
        let pattern = CacheKey::user_feature_access_pattern(user_id);
        let keys = match self.backend.keys_matching(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache unavailable, skipping feature-access cascade: {}", e);
                return;
            }
        };
        if keys.is_empty() {
            return;
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        match self.backend.mdelete(&refs).await {
            Ok(()) => debug!(
                "Cascaded invalidation: {} feature-access keys for {}",
                refs.len(),
                user_id
            ),
            Err(e) => warn!("Cache unavailable, feature-access cascade incomplete: {}", e),
        }
    }

    // ========================================================================
    // Bulk population
    // ========================================================================

    /// Cache many subscriptions (entries plus user pointers) in a single
    /// batched pipeline. Used for startup warm-up.
    pub async fn cache_subscriptions(&self, subs: &[Subscription]) {
        let ops: Vec<PipelineOp> = subs.iter().filter_map(Self::subscription_ops).flatten().collect();
        if ops.is_empty() {
            return;
        }
        match self.backend.pipeline(ops).await {
            Ok(()) => info!("Warmed {} subscriptions into cache", subs.len()),
            Err(e) => warn!("Cache unavailable, subscription warm-up skipped: {}", e),
        }
    }

    /// Cache many plans in a single batched pipeline.
    pub async fn cache_plans(&self, plans: &[Plan]) {
        let ops: Vec<PipelineOp> = plans
            .iter()
            .filter_map(|plan| {
                let value = plan.serialize_for_cache().ok()?;
                Some(PipelineOp::Set {
                    key: plan.cache_key(),
                    value,
                    ttl: Some(PLAN_TTL),
                })
            })
            .collect();
        if ops.is_empty() {
            return;
        }
        match self.backend.pipeline(ops).await {
            Ok(()) => info!("Warmed {} plans into cache", plans.len()),
            Err(e) => warn!("Cache unavailable, plan warm-up skipped: {}", e),
        }
    }

    /// Startup warm-up: bulk-populate subscriptions and plans.
    pub async fn warm_up(&self, subs: &[Subscription], plans: &[Plan]) {
        self.cache_subscriptions(subs).await;
        self.cache_plans(plans).await;
    }

    // ========================================================================
    // Observability
    // ========================================================================

    /// Live key counts per namespace plus hit/miss counters.
    ///
    /// Namespace counts come from pattern scans and are zero when the
    /// backend is unavailable.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            subscriptions: self.count_namespace(NS_SUBSCRIPTION).await,
            user_pointers: self.count_namespace(NS_USER_SUBSCRIPTION).await,
            plans: self.count_namespace(NS_PLAN).await,
            feature_access: self.count_namespace(NS_FEATURE_ACCESS).await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn count_namespace(&self, namespace: &str) -> usize {
        match self
            .backend
            .keys_matching(&CacheKey::namespace_pattern(namespace))
            .await
        {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!("Cache unavailable, stats scan skipped for {}: {}", namespace, e);
                0
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Pipeline ops writing one subscription entry and its user pointer.
    fn subscription_ops(sub: &Subscription) -> Option<Vec<PipelineOp>> {
        let entry = match sub.serialize_for_cache() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping uncacheable subscription {}: {}", sub.id, e);
                return None;
            }
        };
        let pointer = match crate::serialization::serialize_for_cache(&sub.id) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping uncacheable user pointer for {}: {}", sub.user_id, e);
                return None;
            }
        };
        Some(vec![
            PipelineOp::Set {
                key: sub.cache_key(),
                value: entry,
                ttl: Some(SUBSCRIPTION_TTL),
            },
            PipelineOp::Set {
                key: CacheKey::user_subscription(&sub.user_id),
                value: pointer,
                ttl: Some(SUBSCRIPTION_TTL),
            },
        ])
    }

    /// Read one entry as one counted logical lookup.
    async fn get_record<T: serde::Serialize + for<'de> serde::Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Option<T> {
        let found = self.read_record(key).await;
        self.count_lookup(found.is_some());
        found
    }

    /// Read and decode one entry without touching the hit/miss counters,
    /// degrading every failure to a miss.
    ///
    /// A corrupted or version-drifted entry is evicted so the next
    /// cache-aside read recomputes it.
    async fn read_record<T: serde::Serialize + for<'de> serde::Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Option<T> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache unavailable for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        match crate::serialization::deserialize_from_cache(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Evicting undecodable cache entry {}: {}", key, e);
                let _ = self.backend.delete(key).await;
                None
            }
        }
    }

    fn count_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Write one record, degrading failures to a no-op.
    async fn set_record<T: CacheRecord>(&self, record: &T, ttl: Duration) {
        let bytes = match record.serialize_for_cache() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping uncacheable record {}: {}", record.cache_key(), e);
                return;
            }
        };
        if let Err(e) = self.backend.set(&record.cache_key(), bytes, Some(ttl)).await {
            warn!("Cache unavailable, skipping write for {}: {}", record.cache_key(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::clock::ManualClock;
    use crate::model::fixtures;

    fn cache() -> SubscriptionCache<InMemoryBackend> {
        SubscriptionCache::with_clock(InMemoryBackend::new(), Arc::new(ManualClock::at(1_000)))
    }

    #[tokio::test]
    async fn test_cache_and_get_subscription() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");

        cache.cache_subscription(&sub).await;

        let cached = cache.get_cached_subscription("sub_1").await;
        assert_eq!(cached, Some(sub));
    }

    #[tokio::test]
    async fn test_get_cached_user_subscription_two_hop() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");

        cache.cache_subscription(&sub).await;

        let cached = cache.get_cached_user_subscription("user_1").await;
        assert_eq!(cached, Some(sub));
    }

    #[tokio::test]
    async fn test_user_lookup_without_pointer_is_miss() {
        let cache = cache();
        assert!(cache.get_cached_user_subscription("user_1").await.is_none());
    }

    #[tokio::test]
    async fn test_dangling_pointer_is_plain_miss() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");

        cache.cache_subscription(&sub).await;
        // Remove the target but leave the pointer in place
        cache
            .backend()
            .delete("subscription:sub_1")
            .await
            .expect("Failed to delete");

        assert!(cache.get_cached_user_subscription("user_1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_subscription_cascades_to_feature_access() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");

        cache.cache_subscription(&sub).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;
        cache.cache_feature_access("user_1", "api_calls", true).await;
        cache.cache_feature_access("user_2", "export_csv", false).await;

        cache.invalidate_subscription("sub_1", Some("user_1")).await;

        assert!(cache.get_cached_subscription("sub_1").await.is_none());
        assert!(cache.get_cached_user_subscription("user_1").await.is_none());
        assert!(cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .is_none());
        assert!(cache
            .get_cached_feature_access("user_1", "api_calls")
            .await
            .is_none());
        // Other users' entitlements are untouched
        assert!(cache
            .get_cached_feature_access("user_2", "export_csv")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_invalidate_without_user_keeps_feature_access() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");

        cache.cache_subscription(&sub).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;

        cache.invalidate_subscription("sub_1", None).await;

        assert!(cache.get_cached_subscription("sub_1").await.is_none());
        assert!(cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_plan_cache_and_invalidate() {
        let cache = cache();
        let plan = fixtures::plan("p1", "Pro");

        cache.cache_plan(&plan).await;
        assert_eq!(cache.get_cached_plan("p1").await, Some(plan));

        cache.invalidate_plan("p1").await;
        assert!(cache.get_cached_plan("p1").await.is_none());
    }

    #[tokio::test]
    async fn test_feature_access_carries_clock_timestamp() {
        let clock = ManualClock::at(42_000);
        let cache =
            SubscriptionCache::with_clock(InMemoryBackend::new(), Arc::new(clock.clone()));

        cache.cache_feature_access("user_1", "export_csv", true).await;

        let access = cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .expect("flag should be cached");
        assert_eq!(access.cached_at, 42_000);
        assert!(access.has_access);
    }

    #[tokio::test]
    async fn test_bulk_population_and_stats() {
        let cache = cache();
        let subs = vec![
            fixtures::subscription("sub_1", "user_1", "p1"),
            fixtures::subscription("sub_2", "user_2", "p1"),
        ];
        let plans = vec![fixtures::plan("p1", "Pro"), fixtures::plan("p2", "Team")];

        cache.warm_up(&subs, &plans).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;

        let stats = cache.stats().await;
        assert_eq!(stats.subscriptions, 2);
        assert_eq!(stats.user_pointers, 2);
        assert_eq!(stats.plans, 2);
        assert_eq!(stats.feature_access, 1);
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let cache = cache();
        let plan = fixtures::plan("p1", "Pro");
        cache.cache_plan(&plan).await;

        cache.get_cached_plan("p1").await;
        cache.get_cached_plan("p1").await;
        cache.get_cached_plan("nope").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate_pct() - 66.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_user_lookup_counts_one_hit() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        cache.cache_subscription(&sub).await;

        assert!(cache.get_cached_user_subscription("user_1").await.is_some());

        // Two backend reads, one logical lookup
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert!((stats.hit_rate_pct() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_dangling_pointer_counts_one_miss() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        cache.cache_subscription(&sub).await;
        cache
            .backend()
            .delete("subscription:sub_1")
            .await
            .expect("Failed to delete");

        assert!(cache.get_cached_user_subscription("user_1").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_reads_to_miss() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        cache.cache_subscription(&sub).await;
        cache.cache_plan(&fixtures::plan("p1", "Pro")).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;

        cache.backend().set_failing(true);

        assert!(cache.get_cached_subscription("sub_1").await.is_none());
        assert!(cache.get_cached_user_subscription("user_1").await.is_none());
        assert!(cache.get_cached_plan("p1").await.is_none());
        assert!(cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .is_none());

        // Failed lookups count as misses; namespace scans degrade to zero
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 4);
        assert_eq!(stats.subscriptions, 0);
        assert_eq!(stats.plans, 0);

        // Entries survived the outage and serve again once it clears
        cache.backend().set_failing(false);
        assert_eq!(cache.get_cached_subscription("sub_1").await, Some(sub));
    }

    #[tokio::test]
    async fn test_backend_failure_makes_writes_no_ops() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        let plan = fixtures::plan("p1", "Pro");

        cache.backend().set_failing(true);
        cache.cache_subscription(&sub).await;
        cache.cache_plan(&plan).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;
        cache.warm_up(std::slice::from_ref(&sub), std::slice::from_ref(&plan)).await;
        cache.backend().set_failing(false);

        // Nothing landed during the outage
        assert!(cache.get_cached_subscription("sub_1").await.is_none());
        assert!(cache.get_cached_plan("p1").await.is_none());
        assert!(cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_makes_invalidation_no_op() {
        let cache = cache();
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        cache.cache_subscription(&sub).await;
        cache.cache_feature_access("user_1", "export_csv", true).await;

        cache.backend().set_failing(true);
        cache.invalidate_subscription("sub_1", Some("user_1")).await;
        cache.invalidate_plan("p1").await;
        cache.backend().set_failing(false);

        // Invalidation was skipped, not half-applied; TTLs cover the rest
        assert!(cache.get_cached_subscription("sub_1").await.is_some());
        assert!(cache
            .get_cached_feature_access("user_1", "export_csv")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_evicted_and_missed() {
        let cache = cache();

        cache
            .backend()
            .set("plan:p1", b"not an envelope".to_vec(), None)
            .await
            .expect("Failed to set");

        assert!(cache.get_cached_plan("p1").await.is_none());
        // Entry was evicted, not left to fail again
        assert_eq!(
            cache.backend().get("plan:p1").await.expect("Failed to get"),
            None
        );
    }
}
