//! Optimized data access layer.
//!
//! Cache-aside wrappers around the canonical store: a hit returns
//! immediately, a miss queries the store, populates the cache and returns.
//! Cache failures never surface here, the cache manager already degraded
//! them to misses. Store failures propagate, because there is no fallback
//! below the canonical store.
//!
//! Concurrent misses on the same key are tolerated: both callers query the
//! store and both write the same entry. Duplicate work, not corruption.

use crate::backend::CacheBackend;
use crate::cache::SubscriptionCache;
use crate::error::Result;
use crate::model::{Plan, Subscription};
use crate::store::SubscriptionStore;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache-aside access to subscriptions and plans.
#[derive(Clone)]
pub struct CachedAccess<B: CacheBackend, S: SubscriptionStore> {
    cache: SubscriptionCache<B>,
    store: Arc<S>,
}

impl<B: CacheBackend, S: SubscriptionStore> CachedAccess<B, S> {
    pub fn new(cache: SubscriptionCache<B>, store: Arc<S>) -> Self {
        CachedAccess { cache, store }
    }

    /// The cache manager underneath, for invalidation after mutations.
    pub fn cache(&self) -> &SubscriptionCache<B> {
        &self.cache
    }

    /// Active subscription for a user, cache-aside.
    ///
    /// # Errors
    /// Returns `Err` only when the cache missed and the store query failed.
    pub async fn subscription_for_user(&self, user_id: &str) -> Result<Option<Subscription>> {
        if let Some(sub) = self.cache.get_cached_user_subscription(user_id).await {
            return Ok(Some(sub));
        }

        match self.store.fetch_active_for_user(user_id).await? {
            Some(sub) => {
                self.cache.cache_subscription(&sub).await;
                Ok(Some(sub))
            }
            None => Ok(None),
        }
    }

    /// Active subscriptions for many users.
    ///
    /// Partitions the input into cache hits and misses, then issues **one**
    /// multi-id store query for all misses (never one query per id) and
    /// caches each fetched subscription. Results keep the input order;
    /// users without an active subscription are skipped.
    ///
    /// # Errors
    /// Returns `Err` if the batched store query fails.
    pub async fn batch_subscriptions(&self, user_ids: &[String]) -> Result<Vec<Subscription>> {
        let mut by_user: HashMap<String, Subscription> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        // Probe the cache for all users concurrently
        let lookups = user_ids
            .iter()
            .map(|user_id| self.cache.get_cached_user_subscription(user_id));
        for (user_id, cached) in user_ids.iter().zip(join_all(lookups).await) {
            match cached {
                Some(sub) => {
                    by_user.insert(user_id.clone(), sub);
                }
                None => misses.push(user_id.clone()),
            }
        }

        if !misses.is_empty() {
            debug!(
                "Batch load: {} hits, {} misses -> one store query",
                by_user.len(),
                misses.len()
            );
            let fetched = self.store.fetch_active_for_users(&misses).await?;
            self.cache.cache_subscriptions(&fetched).await;
            for sub in fetched {
                by_user.insert(sub.user_id.clone(), sub);
            }
        }

        Ok(user_ids
            .iter()
            .filter_map(|user_id| by_user.remove(user_id))
            .collect())
    }

    /// Plan by id, cache-aside.
    ///
    /// # Errors
    /// Returns `Err` only when the cache missed and the store query failed.
    pub async fn plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        if let Some(plan) = self.cache.get_cached_plan(plan_id).await {
            return Ok(Some(plan));
        }

        match self.store.fetch_plan(plan_id).await? {
            Some(plan) => {
                self.cache.cache_plan(&plan).await;
                Ok(Some(plan))
            }
            None => Ok(None),
        }
    }

    /// Whether a user currently has access to a feature, cache-aside over
    /// the derived feature-access namespace.
    ///
    /// On miss the flag is recomputed from the user's subscription and its
    /// plan, then cached at the short feature-access TTL.
    ///
    /// # Errors
    /// Returns `Err` if the store queries behind a recompute fail.
    pub async fn has_feature_access(&self, user_id: &str, feature: &str) -> Result<bool> {
        if let Some(access) = self.cache.get_cached_feature_access(user_id, feature).await {
            return Ok(access.has_access);
        }

        let has_access = match self.subscription_for_user(user_id).await? {
            Some(sub) if sub.is_active() => match self.plan(&sub.plan_id).await? {
                Some(plan) => plan.grants(feature),
                None => false,
            },
            _ => false,
        };

        self.cache
            .cache_feature_access(user_id, feature, has_access)
            .await;
        Ok(has_access)
    }
}
