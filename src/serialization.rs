//! Postcard-based cache serialization with versioned envelopes.
//!
//! Every payload written to the cache backend is wrapped in a versioned
//! envelope so that what is written can be validated when it is later read.
//! Cached projections are explicit serde structs; loose, shape-drifting
//! documents never reach the backend.
//!
//! # Format
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "SBCH"              u32 varint         postcard::to_allocvec(T)
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic:** the same value always produces identical bytes
//! - **Validated:** magic and version are checked on every read
//! - **Versioned:** schema changes force eviction, not silent migration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for cache entries: b"SBCH"
///
/// Any entry without this signature is rejected during deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"SBCH";

/// Current schema version.
///
/// Increment when making breaking changes to cached projections (adding,
/// removing, retyping or reordering fields). Entries written under an older
/// version are evicted and recomputed from the canonical store on next
/// access; no action needed during deployments.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope wrapping every cache entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"SBCH"
    pub magic: [u8; 4],
    /// Schema version: must match [`CURRENT_SCHEMA_VERSION`]
    pub version: u32,
    /// The actual cached data
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Wrap a payload in an envelope carrying the current magic and version.
    pub fn new(payload: T) -> Self {
        CacheEnvelope {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value for cache storage, wrapped in the versioned envelope.
///
/// # Errors
/// Returns `Error::Serialization` if postcard encoding fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a value from cache storage, validating the envelope.
///
/// # Errors
/// - `Error::InvalidCacheEntry`: envelope cannot be decoded or bad magic
/// - `Error::VersionMismatch`: entry written under a different schema version
/// - `Error::Deserialization`: payload decoding fails
pub fn deserialize_from_cache<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes)
        .map_err(|e| Error::InvalidCacheEntry(format!("envelope decode failed: {}", e)))?;

    if envelope.magic != CACHE_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "bad magic: {:?}",
            envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
