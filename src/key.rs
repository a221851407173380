//! Cache key construction for the subscription namespaces.
//!
//! Keys follow the `{namespace}:{id}` convention. Four namespaces exist:
//!
//! - `subscription:{id}`: cached subscription projection
//! - `user_subscription:{user_id}`: pointer from user to subscription id
//! - `plan:{id}`: cached plan projection
//! - `feature_access:{user_id}:{feature}`: derived entitlement flag
//!
//! The feature-access namespace embeds the user id as the second segment so
//! that cascading invalidation can match every entitlement of a user with a
//! single `feature_access:{user_id}:*` pattern.

/// Namespace prefix for subscription entries.
pub const NS_SUBSCRIPTION: &str = "subscription";
/// Namespace prefix for user→subscription pointers.
pub const NS_USER_SUBSCRIPTION: &str = "user_subscription";
/// Namespace prefix for plan entries.
pub const NS_PLAN: &str = "plan";
/// Namespace prefix for per-user feature-access flags.
pub const NS_FEATURE_ACCESS: &str = "feature_access";

/// Builder for namespaced cache keys.
pub struct CacheKey;

impl CacheKey {
    /// Key for a subscription by id: `subscription:{id}`
    pub fn subscription(id: &str) -> String {
        format!("{}:{}", NS_SUBSCRIPTION, id)
    }

    /// Pointer key from user to subscription id: `user_subscription:{user_id}`
    pub fn user_subscription(user_id: &str) -> String {
        format!("{}:{}", NS_USER_SUBSCRIPTION, user_id)
    }

    /// Key for a plan by id: `plan:{id}`
    pub fn plan(id: &str) -> String {
        format!("{}:{}", NS_PLAN, id)
    }

    /// Key for a single feature-access flag: `feature_access:{user_id}:{feature}`
    pub fn feature_access(user_id: &str, feature: &str) -> String {
        format!("{}:{}:{}", NS_FEATURE_ACCESS, user_id, feature)
    }

    /// Pattern matching every feature-access key of one user.
    ///
    /// Used by cascading invalidation after a subscription change.
    pub fn user_feature_access_pattern(user_id: &str) -> String {
        format!("{}:{}:*", NS_FEATURE_ACCESS, user_id)
    }

    /// Pattern matching every key in a namespace, for stats scans.
    pub fn namespace_pattern(namespace: &str) -> String {
        format!("{}:*", namespace)
    }

    /// Split a key into its `:`-separated segments.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(':').collect()
    }
}
