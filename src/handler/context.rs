//! Request-scoped context for handler calls.
//!
//! A [`CallContext`] travels with one dispatch. It carries:
//! - a cancellation token
//! - the cache, ETag and debug flags plus a TTL override
//! - typed extensions (values injected by the transport, read back by
//!   version methods that take an extra argument)
//! - a debug collector handlers may write diagnostic values into
//!
//! # Example
//!
//! ```ignore
//! let ctx = CallContext::new();
//! ctx.enable_cache();
//! ctx.insert_extension(RequestIp("10.0.0.1".into()));
//!
//! let uncached = ctx.child_without_cache();
//! assert!(!uncached.is_cache_enabled());
//! ```

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

type Extensions = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Diagnostic values collected while debug mode is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugInfo {
    pub modules: BTreeMap<String, Value>,
}

struct ContextInner {
    cancel: CancellationToken,
    use_cache: AtomicBool,
    use_etag: AtomicBool,
    debug: AtomicBool,
    cache_ttl: Mutex<Option<Duration>>,
    extensions: RwLock<Extensions>,
    debug_info: Mutex<DebugInfo>,
}

impl ContextInner {
    fn new(cancel: CancellationToken, extensions: Extensions) -> Self {
        Self {
            cancel,
            use_cache: AtomicBool::new(false),
            use_etag: AtomicBool::new(false),
            debug: AtomicBool::new(false),
            cache_ttl: Mutex::new(None),
            extensions: RwLock::new(extensions),
            debug_info: Mutex::new(DebugInfo::default()),
        }
    }
}

/// Context passed to version methods.
///
/// `CallContext` is `Clone`; clones share the same flags and extensions.
/// Use [`child_without_cache`](Self::child_without_cache) for an
/// independent copy.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<ContextInner>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.is_cancelled())
            .field("use_cache", &self.inner.use_cache.load(Ordering::Relaxed))
            .field("use_etag", &self.inner.use_etag.load(Ordering::Relaxed))
            .field("debug", &self.is_debug())
            .finish()
    }
}

impl CallContext {
    /// Create a context with cache, ETag and debug disabled.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a context bound to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner::new(cancel, Extensions::new())),
        }
    }

    /// Independent context sharing cancellation and extensions, with cache,
    /// ETag and debug reset to disabled.
    pub fn child_without_cache(&self) -> Self {
        let extensions = self.inner.extensions.read().clone();
        Self {
            inner: Arc::new(ContextInner::new(
                self.inner.cancel.child_token(),
                extensions,
            )),
        }
    }

    #[inline]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn enable_cache(&self) {
        self.inner.use_cache.store(true, Ordering::Release);
    }

    /// Disabling the cache also disables ETags.
    pub fn disable_cache(&self) {
        self.inner.use_cache.store(false, Ordering::Release);
        self.inner.use_etag.store(false, Ordering::Release);
    }

    /// Always `false` while debug mode is on.
    pub fn is_cache_enabled(&self) -> bool {
        !self.is_debug() && self.inner.use_cache.load(Ordering::Acquire)
    }

    pub fn enable_etag(&self) {
        self.inner.use_etag.store(true, Ordering::Release);
    }

    pub fn disable_etag(&self) {
        self.inner.use_etag.store(false, Ordering::Release);
    }

    /// Always `false` while debug mode is on.
    pub fn is_etag_enabled(&self) -> bool {
        !self.is_debug() && self.inner.use_etag.load(Ordering::Acquire)
    }

    /// Override the dispatcher's cache TTL for this call.
    pub fn set_cache_ttl(&self, ttl: Duration) {
        *self.inner.cache_ttl.lock() = Some(ttl);
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        *self.inner.cache_ttl.lock()
    }

    pub fn enable_debug(&self) {
        self.inner.debug.store(true, Ordering::Release);
    }

    pub fn disable_debug(&self) {
        self.inner.debug.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_debug(&self) -> bool {
        self.inner.debug.load(Ordering::Acquire)
    }

    /// Record a diagnostic value under `name`.
    ///
    /// Returns `false` (and records nothing) when debug mode is off or the
    /// value does not serialize.
    pub fn debug_add<T: Serialize>(&self, name: &str, value: &T) -> bool {
        if !self.is_debug() {
            return false;
        }
        match serde_json::to_value(value) {
            Ok(value) => {
                self.inner
                    .debug_info
                    .lock()
                    .modules
                    .insert(name.to_string(), value);
                true
            }
            Err(_) => false,
        }
    }

    /// Snapshot of the collected diagnostics, `None` when debug mode is off.
    pub fn debug_info(&self) -> Option<DebugInfo> {
        self.is_debug().then(|| self.inner.debug_info.lock().clone())
    }

    /// Store a typed extension, replacing any previous value of that type.
    pub fn insert_extension<T: Send + Sync + 'static>(&self, value: T) {
        self.inner
            .extensions
            .write()
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.inner
            .extensions
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }
}
