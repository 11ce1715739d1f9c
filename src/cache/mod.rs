//! Cache module - response cache contract and in-process implementations.
//!
//! Provides:
//! - [`Cache`] - the store the dispatcher reads and writes cached responses
//!   through, with per-key locking so concurrent identical calls invoke the
//!   handler once
//! - [`CacheEntry`] - one cached response
//! - [`LocalCacheLocker`] - in-process per-key lock
//! - [`MapCache`] - in-memory cache with TTLs
//!
//! # Example
//!
//! ```ignore
//! use versioned_rpc::cache::{Cache, CacheEntry, MapCache};
//!
//! let cache = MapCache::new();
//! cache.lock(b"key").await;
//! if cache.get(b"key").await.is_none() {
//!     cache.put(b"key", Arc::new(CacheEntry::new(content)), None).await;
//! }
//! cache.unlock(b"key");
//! ```

mod locker;
mod map;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::handler::BoxFuture;

pub use locker::LocalCacheLocker;
pub use map::MapCache;

/// One cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Encoded response body.
    pub content: Bytes,
    /// Optional compressed form of `content`, supplied by the store owner.
    pub compressed: Option<Bytes>,
    /// ETag of `content`, present when ETags were enabled for the call.
    pub hash: Option<String>,
    /// Decoded body, kept to avoid decoding `content` on every hit.
    pub body: Option<Value>,
}

impl CacheEntry {
    pub fn new(content: Bytes) -> Self {
        Self {
            content,
            compressed: None,
            hash: None,
            body: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_compressed(mut self, compressed: Bytes) -> Self {
        self.compressed = Some(compressed);
        self
    }
}

/// Response cache with per-key locking.
///
/// `unlock` is synchronous so it can run from a drop guard.
pub trait Cache: Send + Sync {
    fn get<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, Option<Arc<CacheEntry>>>;

    /// Store an entry. `None` TTL means no expiry.
    fn put<'a>(
        &'a self,
        key: &'a [u8],
        entry: Arc<CacheEntry>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, ()>;

    /// Wait until `key` is not held by anyone else, then hold it.
    fn lock<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, ()>;

    fn unlock(&self, key: &[u8]);
}

/// Hex-encoded SHA-256 of cached content, used as its ETag.
pub fn etag_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
