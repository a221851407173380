//! # subcache
//!
//! Subscription caching and health monitoring for SaaS billing data.
//!
//! ## Features
//!
//! - **Cache-Aside Reads:** Subscriptions, plans and feature-access flags
//!   served from cache with per-namespace TTLs
//! - **Cascading Invalidation:** Dropping a subscription also drops its user
//!   pointer and every derived entitlement flag
//! - **Graceful Degradation:** A lost cache backend lowers the hit rate,
//!   it never breaks callers
//! - **Batch Loading:** Many users resolved with one store query for all
//!   cache misses, never one query per user
//! - **Health Monitoring:** Periodic database, cache, business and payment
//!   checks folded into a composite score
//! - **Rule-Driven Alerting:** Runtime-configurable threshold rules with
//!   per-type alert dedup and best-effort notification fan-out
//!
//! ## Quick Start
//!
//! ```ignore
//! use subcache::{
//!     backend::InMemoryBackend,
//!     CachedAccess, SubscriptionCache,
//! };
//! use std::sync::Arc;
//!
//! // 1. Build the cache over a backend (swap in RedisBackend in prod)
//! let cache = SubscriptionCache::new(InMemoryBackend::new());
//!
//! // 2. Wrap your store implementation for cache-aside reads
//! let access = CachedAccess::new(cache, Arc::new(store));
//!
//! // 3. Reads hit the cache first, misses fall through and repopulate
//! let sub = access.subscription_for_user("user_1").await?;
//! let allowed = access.has_feature_access("user_1", "export_csv").await?;
//!
//! // 4. Invalidate after mutations - cascades to derived entries
//! access.cache().invalidate_subscription("sub_1", Some("user_1")).await;
//! ```
//!
//! ## Monitoring
//!
//! ```ignore
//! use subcache::{
//!     AlertDispatcher, HealthMonitor, MonitorConfig, RuleEngine,
//! };
//!
//! let engine = Arc::new(RuleEngine::new(store.clone(), dispatcher, clock));
//! engine.add_rule(payment_success_rule);
//!
//! let monitor = HealthMonitor::new(cache, store, engine, MonitorConfig::default());
//! monitor.start();                       // periodic ticks in the background
//! let report = monitor.latest_report().await;
//! monitor.stop();
//! ```

#[macro_use]
extern crate log;

pub mod access;
pub mod alert;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod key;
pub mod model;
pub mod monitor;
pub mod rules;
pub mod serialization;
pub mod store;

// Re-exports for convenience
pub use access::CachedAccess;
pub use alert::{Alert, AlertLog, Severity};
pub use backend::CacheBackend;
pub use cache::{CacheStats, SubscriptionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{AlertDispatcher, LogChannel, NotificationChannel};
pub use error::{Error, Result};
pub use model::{
    BillingPeriod, FeatureAccess, FeatureLimit, Plan, Subscription, SubscriptionStatus,
};
pub use monitor::{ComponentHealth, HealthMonitor, HealthReport, MonitorConfig};
pub use rules::{Comparison, MetricKind, MonitoringRule, RuleEngine, TickMetrics};
pub use store::{ChurnStats, PaymentStats, SubscriptionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
