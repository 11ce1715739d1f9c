//! In-memory cache with per-entry expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::trace;

use super::{Cache, CacheEntry, LocalCacheLocker};
use crate::handler::BoxFuture;

struct Stored {
    entry: Arc<CacheEntry>,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// [`Cache`] backed by a `HashMap`, locking through a
/// [`LocalCacheLocker`].
///
/// Expired entries are dropped lazily on read and by
/// [`purge_expired`](Self::purge_expired).
#[derive(Default)]
pub struct MapCache {
    entries: RwLock<HashMap<Vec<u8>, Stored>>,
    locker: LocalCacheLocker,
}

impl MapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, stored| stored.is_live(now));
        before - entries.len()
    }

    fn lookup(&self, key: &[u8]) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(stored) if stored.is_live(now) => {
                    return Some(Arc::clone(&stored.entry));
                }
                Some(_) => {}
            }
        }
        self.remove_expired(key, now);
        None
    }

    /// Remove `key` only if it is still expired at `now`; a `put` may have
    /// replaced it since the read guard was released.
    fn remove_expired(&self, key: &[u8], now: Instant) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(stored) if !stored.is_live(now) => {
                trace!(key_len = key.len(), "dropping expired cache entry");
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn store(&self, key: &[u8], entry: Arc<CacheEntry>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .insert(key.to_vec(), Stored { entry, expires_at });
    }
}

impl Cache for MapCache {
    fn get<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, Option<Arc<CacheEntry>>> {
        Box::pin(async move { self.lookup(key) })
    }

    fn put<'a>(
        &'a self,
        key: &'a [u8],
        entry: Arc<CacheEntry>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.store(key, entry, ttl) })
    }

    fn lock<'a>(&'a self, key: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(self.locker.lock(key))
    }

    fn unlock(&self, key: &[u8]) {
        self.locker.unlock(key);
    }
}
