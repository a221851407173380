//! Cache backend implementations.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// A single operation inside a batched pipeline execution.
#[derive(Clone, Debug)]
pub enum PipelineOp {
    /// Store a value with an optional TTL.
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Remove a key.
    Delete { key: String },
}

/// Backend memory usage, for the cache health check.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryUsage {
    /// Bytes currently held by the backend.
    pub used_bytes: u64,
    /// Configured ceiling, if the backend has one (Redis maxmemory).
    pub max_bytes: Option<u64>,
}

impl MemoryUsage {
    /// Fraction of the ceiling in use, if a ceiling is configured.
    pub fn pressure(&self) -> Option<f64> {
        self.max_bytes
            .filter(|max| *max > 0)
            .map(|max| self.used_bytes as f64 / max as f64)
    }
}

/// Trait for cache backend implementations.
///
/// Abstracts storage operations, allowing swappable backends. The backend
/// reports failures honestly via `Err`; the degradation-to-miss contract is
/// enforced one layer up, in [`crate::cache::SubscriptionCache`], so that a
/// lost connection lowers the hit rate instead of breaking callers.
///
/// **IMPORTANT:** All methods use `&self` to allow concurrent access.
/// Implementations use interior mutability or external storage.
#[async_trait]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve value from cache by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found in cache
    /// - `Ok(None)` - Cache miss (key not found or expired)
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value in cache with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove value from cache.
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn delete(&self, key: &str) -> Result<()>;

    /// Bulk get operation (optional optimization).
    ///
    /// Default implementation calls `get()` per key. Override for batch
    /// efficiency (e.g. Redis MGET).
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    /// Bulk delete operation (optional optimization).
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// List keys matching a glob-style pattern (e.g. `feature_access:u1:*`).
    ///
    /// Backs cascading invalidation and namespace stats. O(n) in key count
    /// on both provided backends.
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Execute a batch of operations in one round trip where the backend
    /// supports it (Redis PIPELINE). Default executes sequentially.
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        for op in ops {
            match op {
                PipelineOp::Set { key, value, ttl } => self.set(&key, value, ttl).await?,
                PipelineOp::Delete { key } => self.delete(&key).await?,
            }
        }
        Ok(())
    }

    /// Health check - verify the backend is reachable (Redis PING).
    ///
    /// # Errors
    /// Returns `Err` if the backend is not accessible
    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    /// Current memory usage (Redis INFO memory).
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs
    async fn memory_usage(&self) -> Result<MemoryUsage> {
        Ok(MemoryUsage::default())
    }

    /// Destructive: drop every key. Reserved for non-production use.
    ///
    /// # Errors
    /// Returns `Err` if the operation is not implemented or fails
    async fn flush_all(&self) -> Result<()> {
        Err(crate::error::Error::NotImplemented(
            "flush_all not implemented for this backend".to_string(),
        ))
    }
}
