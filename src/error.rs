//! Error types for the subscription cache and monitoring core.

use std::fmt;

/// Result type for cache and monitoring operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the crate.
///
/// The cache is an optional accelerator: callers of the cache manager and the
/// optimized access layer never see `CacheUnavailable`; those paths degrade
/// to the canonical store instead. The variants below surface only at the
/// boundaries that own them (backend implementations, store collaborators,
/// the rule engine, the dispatcher).
#[derive(Debug, Clone)]
pub enum Error {
    /// Cache backend is unreachable or returned a protocol error.
    ///
    /// Non-fatal by contract: every cache-consuming operation treats this as
    /// a miss/no-op and falls back to the canonical store.
    CacheUnavailable(String),

    /// Canonical store query failed.
    ///
    /// Propagated upward from the access layer; there is no further fallback
    /// below the canonical store.
    StoreQuery(String),

    /// A monitoring rule could not be evaluated this tick.
    ///
    /// Logged by the rule engine; the offending rule is skipped for the
    /// current tick only and other rules continue evaluating.
    RuleEvaluation { rule_id: String, message: String },

    /// Notification delivery failed on a single channel.
    ///
    /// Logged per channel; never affects alert persistence or delivery on
    /// the remaining channels.
    Dispatch { channel: String, message: String },

    /// Serialization failed when converting a record to cache bytes.
    Serialization(String),

    /// Deserialization failed when converting cache bytes to a record.
    ///
    /// Indicates corrupted or malformed data in cache. The entry should be
    /// evicted and recomputed.
    Deserialization(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    ///
    /// Returned when the magic header is not `b"SBCH"` or the envelope
    /// cannot be decoded. The entry should be evicted and recomputed.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// Expected during deployments that change cached DTO shapes: the entry
    /// is evicted and recomputed from the canonical store on next access.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from the cached entry)
        found: u32,
    },

    /// Configuration error during initialization.
    Config(String),

    /// Feature not implemented or not enabled (e.g. the `redis` feature).
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Error::StoreQuery(msg) => write!(f, "Store query error: {}", msg),
            Error::RuleEvaluation { rule_id, message } => {
                write!(f, "Rule evaluation failed for {}: {}", rule_id, message)
            }
            Error::Dispatch { channel, message } => {
                write!(f, "Dispatch failed on channel {}: {}", channel, message)
            }
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Deserialization(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::CacheUnavailable(e.to_string())
        } else if e.is_syntax() {
            Error::Deserialization(e.to_string())
        } else {
            Error::Serialization(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::CacheUnavailable(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::CacheUnavailable(format!("Redis error: {}", e))
    }
}
