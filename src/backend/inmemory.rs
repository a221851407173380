//! In-memory cache backend (default, thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! TTL expiration is handled lazily on access.

use super::{CacheBackend, MemoryUsage, PipelineOp};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// In-memory cache entry with optional expiration.
struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        Entry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Thread-safe async in-memory cache backend.
///
/// The default backend for tests and single-process deployments. Supports
/// the full backend surface including glob-lite key scans, so cascading
/// invalidation behaves identically to the Redis backend.
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, Entry>>,
    failing: Arc<AtomicBool>,
}

/// Match a key against a glob-lite pattern.
///
/// Supports the subset the key namespaces need: a literal prefix with an
/// optional trailing `*`. `feature_access:u1:*` matches every key starting
/// with `feature_access:u1:`; a pattern without `*` matches exactly.
fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl InMemoryBackend {
    /// Create a new in-memory cache backend.
    pub fn new() -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail with `CacheUnavailable` until reset.
    ///
    /// The cache-side counterpart of `InMemoryStore::set_failing`: lets
    /// tests exercise the degradation contract without a real outage.
    /// Stored entries survive the simulated outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::CacheUnavailable(
                "backend set to failing mode".to_string(),
            ));
        }
        Ok(())
    }

    /// Current number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_failing()?;
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        // Drop the expired entry if one was there
        self.store.remove(key);
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_failing()?;
        let entry = Entry::new(value, ttl);
        self.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_failing()?;
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_failing()?;
        let results: Vec<Option<Vec<u8>>> = keys
            .iter()
            .map(|k| {
                self.store.get(*k).and_then(|entry| {
                    if entry.is_expired() {
                        None
                    } else {
                        Some(entry.data.clone())
                    }
                })
            })
            .collect();

        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn mdelete(&self, keys: &[&str]) -> Result<()> {
        self.check_failing()?;
        for key in keys {
            self.store.remove(*key);
        }

        debug!("✓ InMemory MDELETE {} keys", keys.len());
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_failing()?;
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| !entry.is_expired() && matches_pattern(entry.key(), pattern))
            .map(|entry| entry.key().clone())
            .collect();

        debug!("✓ InMemory KEYS {} -> {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        self.check_failing()?;
        let count = ops.len();
        for op in ops {
            match op {
                PipelineOp::Set { key, value, ttl } => {
                    self.store.insert(key, Entry::new(value, ttl));
                }
                PipelineOp::Delete { key } => {
                    self.store.remove(&key);
                }
            }
        }

        debug!("✓ InMemory PIPELINE {} ops", count);
        Ok(())
    }

    async fn ping(&self) -> Result<bool> {
        self.check_failing()?;
        Ok(true)
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        self.check_failing()?;
        let used_bytes: u64 = self
            .store
            .iter()
            .map(|entry| (entry.key().len() + entry.data.len()) as u64)
            .sum();

        Ok(MemoryUsage {
            used_bytes,
            max_bytes: None,
        })
    }

    async fn flush_all(&self) -> Result<()> {
        self.check_failing()?;
        self.store.clear();
        warn!("⚠ InMemory FLUSH_ALL executed - all cache cleared!");
        Ok(())
    }
}
