//! Cached projections of the canonical billing entities.
//!
//! These are explicit, versioned DTOs: the exact shape written to and read
//! from the cache backend. The canonical store owns the full documents; the
//! cache holds time-bounded copies of the fields the application reads on
//! hot paths.

use crate::error::Result;
use crate::key::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trait implemented by every projection stored in cache.
///
/// Ties a record to its namespaced key and to the versioned envelope
/// serialization. The serialize/deserialize methods are not overridable so
/// that every entry in the backend carries the same envelope.
pub trait CacheRecord: Send + Sync + Serialize + for<'de> Deserialize<'de> + Clone {
    /// Full namespaced cache key for this record.
    fn cache_key(&self) -> String;

    /// Serialize for cache storage (postcard + versioned envelope).
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(self)
    }

    /// Deserialize from cache storage, validating the envelope.
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(bytes)
    }
}

/// Lifecycle status of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Cancelled,
    Expired,
}

/// Billing cadence of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

/// Cached subscription projection.
///
/// Mutated only by the canonical store; the cache holds a copy bounded by
/// the subscription TTL. Period bounds are unix epoch seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub billing_period: BillingPeriod,
    pub current_period_start: u64,
    pub current_period_end: u64,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<u64>,
}

impl Subscription {
    /// True while the subscription entitles the user to its plan's features.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

impl CacheRecord for Subscription {
    fn cache_key(&self) -> String {
        CacheKey::subscription(&self.id)
    }
}

/// Per-feature entry in a plan's feature/limit map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureLimit {
    pub enabled: bool,
    /// None = unlimited
    pub limit: Option<u64>,
}

/// Cached plan projection.
///
/// Plans change rarely; changes invalidate by id. The feature map uses a
/// BTreeMap so serialized bytes stay deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_monthly_cents: u64,
    pub price_yearly_cents: u64,
    pub features: BTreeMap<String, FeatureLimit>,
}

impl Plan {
    /// Whether this plan grants the named feature.
    pub fn grants(&self, feature: &str) -> bool {
        self.features.get(feature).map(|f| f.enabled).unwrap_or(false)
    }
}

impl CacheRecord for Plan {
    fn cache_key(&self) -> String {
        CacheKey::plan(&self.id)
    }
}

/// Cached per-user feature-access flag.
///
/// Derived entirely from Subscription + Plan, so it must never outlive
/// either source: its TTL is deliberately the shortest of the three
/// namespaces and it is deleted whenever the user's subscription is
/// invalidated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureAccess {
    pub user_id: String,
    pub feature: String,
    pub has_access: bool,
    /// Unix epoch seconds at which the flag was computed.
    pub cached_at: u64,
}

impl CacheRecord for FeatureAccess {
    fn cache_key(&self) -> String {
        CacheKey::feature_access(&self.user_id, &self.feature)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;

    #[test]
    fn test_subscription_cache_key() {
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        assert_eq!(sub.cache_key(), "subscription:sub_1");
    }

    #[test]
    fn test_subscription_roundtrip() {
        let sub = fixtures::subscription("sub_1", "user_1", "p1");
        let bytes = sub.serialize_for_cache().expect("serialize failed");
        let decoded = Subscription::deserialize_from_cache(&bytes).expect("deserialize failed");
        assert_eq!(sub, decoded);
    }

    #[test]
    fn test_is_active() {
        let mut sub = fixtures::subscription("sub_1", "user_1", "p1");
        assert!(sub.is_active());

        sub.status = SubscriptionStatus::Trialing;
        assert!(sub.is_active());

        sub.status = SubscriptionStatus::Cancelled;
        assert!(!sub.is_active());
    }

    #[test]
    fn test_plan_grants() {
        let plan = fixtures::plan("p1", "Pro");
        assert!(plan.grants("export_csv"));
        assert!(!plan.grants("sso"));
    }

    #[test]
    fn test_feature_access_cache_key() {
        let access = FeatureAccess {
            user_id: "user_1".to_string(),
            feature: "export_csv".to_string(),
            has_access: true,
            cached_at: 1_700_000_000,
        };
        assert_eq!(access.cache_key(), "feature_access:user_1:export_csv");
    }
}
