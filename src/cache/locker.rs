//! In-process per-key lock.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Serializes work per cache key within one process.
///
/// Each held key owns a `watch` sender. Waiters subscribe to it and wake
/// when the holder unlocks (the sender is dropped), then race to take the
/// key again. Exactly one of them wins; the rest wait on the new holder.
#[derive(Debug, Default)]
pub struct LocalCacheLocker {
    jobs: Mutex<HashMap<Vec<u8>, watch::Sender<()>>>,
}

impl LocalCacheLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free, then hold it.
    pub async fn lock(&self, key: &[u8]) {
        loop {
            let mut released = {
                let mut jobs = self.jobs.lock();
                match jobs.get(key) {
                    Some(holder) => holder.subscribe(),
                    None => {
                        let (holder, _) = watch::channel(());
                        jobs.insert(key.to_vec(), holder);
                        return;
                    }
                }
            };
            // Err once the sender is gone, i.e. the key was unlocked.
            let _ = released.changed().await;
        }
    }

    /// Release `key`. Unlocking a key that is not held is a no-op.
    pub fn unlock(&self, key: &[u8]) {
        self.jobs.lock().remove(key);
    }

    pub fn is_locked(&self, key: &[u8]) -> bool {
        self.jobs.lock().contains_key(key)
    }
}
