//! Dispatcher - from a route and a parameter source to a response.
//!
//! The [`Dispatcher`] ties the pieces together:
//! 1. Find the version registered for the route
//! 2. Unmarshal its parameters from the source
//! 3. Serve from cache, or invoke the version method under a per-key lock
//! 4. Classify the outcome (success, declared error, unknown error, panic)
//!
//! Transports call [`Dispatcher::dispatch`], or the two halves
//! [`unmarshal_parameters`](Dispatcher::unmarshal_parameters) and
//! [`call_handler`](Dispatcher::call_handler) when they need to inspect the
//! request in between.
//!
//! # Example
//!
//! ```ignore
//! use versioned_rpc::{CallContext, Dispatcher, FormSource, MapCache};
//!
//! let dispatcher = Dispatcher::builder(Arc::new(registry))
//!     .cache(Arc::new(MapCache::new()))
//!     .cache_ttl(Duration::from_secs(60))
//!     .build();
//!
//! let ctx = CallContext::new();
//! ctx.enable_cache();
//! let mut source = FormSource::from_query("id=7");
//! let response = dispatcher.dispatch(&ctx, "/users/v1/", &mut source).await?;
//! ```

mod unwind;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::cache::{etag_hash, Cache, CacheEntry};
use crate::codec::{cache_key, ContentCodec};
use crate::error::{CallError, CodecError, MethodError};
use crate::handler::{CallContext, Outcome, Registry, Version};
use crate::params::{unmarshal, ParameterSource};

/// Called before every invocation, cached or not.
pub type AugmentRequestFn = Arc<dyn Fn(&CallContext, &Version) + Send + Sync>;
/// Called after a successful call with its wall time.
pub type SuccessFn = Arc<dyn Fn(&CallContext, &Version, &Response, Duration) + Send + Sync>;
/// Called for every failed call except panics.
pub type ErrorFn = Arc<dyn Fn(&CallContext, &Version, &CallError) + Send + Sync>;
/// Called with the panic message and backtrace.
pub type PanicFn = Arc<dyn Fn(&CallContext, &Version, &str, &str) + Send + Sync>;
pub type CacheHitFn = Arc<dyn Fn(&CallContext, &Version, &CacheEntry) + Send + Sync>;
pub type CacheMissFn = Arc<dyn Fn(&CallContext, &Version) + Send + Sync>;
/// Overrides the cache key. Returning `None` bypasses the cache.
pub type CacheKeyFn = Arc<dyn Fn(&CallContext, &Version, &Value) -> Option<Vec<u8>> + Send + Sync>;

/// Optional hooks into the dispatch lifecycle.
#[derive(Clone, Default)]
pub struct DispatchCallbacks {
    augment_request: Option<AugmentRequestFn>,
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_panic: Option<PanicFn>,
    on_cache_hit: Option<CacheHitFn>,
    on_cache_miss: Option<CacheMissFn>,
    get_cache_key: Option<CacheKeyFn>,
}

impl fmt::Debug for DispatchCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCallbacks")
            .field("augment_request", &self.augment_request.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_panic", &self.on_panic.is_some())
            .field("on_cache_hit", &self.on_cache_hit.is_some())
            .field("on_cache_miss", &self.on_cache_miss.is_some())
            .field("get_cache_key", &self.get_cache_key.is_some())
            .finish()
    }
}

impl DispatchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn augment_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version) + Send + Sync + 'static,
    {
        self.augment_request = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version, &Response, Duration) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version, &CallError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_panic<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version, &str, &str) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(f));
        self
    }

    pub fn on_cache_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version, &CacheEntry) + Send + Sync + 'static,
    {
        self.on_cache_hit = Some(Arc::new(f));
        self
    }

    pub fn on_cache_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version) + Send + Sync + 'static,
    {
        self.on_cache_miss = Some(Arc::new(f));
        self
    }

    pub fn get_cache_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &Version, &Value) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.get_cache_key = Some(Arc::new(f));
        self
    }
}

/// Unmarshaled request, ready for [`Dispatcher::call_handler`].
pub struct RequestValue {
    params: Value,
    request: Box<dyn Any + Send>,
}

impl fmt::Debug for RequestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestValue")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl RequestValue {
    /// Collected parameters, keyed by wire key.
    pub fn params(&self) -> &Value {
        &self.params
    }
}

/// Result of a successful call.
#[derive(Debug, Clone)]
pub struct Response {
    body: Value,
    entry: Option<Arc<CacheEntry>>,
    from_cache: bool,
}

impl Response {
    fn fresh(body: Value) -> Self {
        Self {
            body,
            entry: None,
            from_cache: false,
        }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Decode the body into a concrete response type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Cache entry the response was served from or stored as.
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        self.entry.as_ref()
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn etag(&self) -> Option<&str> {
        self.entry.as_ref()?.hash.as_deref()
    }
}

/// Holds a cache key lock; unlocks on drop.
struct CacheLock<'a> {
    cache: &'a dyn Cache,
    key: &'a [u8],
}

impl<'a> CacheLock<'a> {
    async fn acquire(cache: &'a dyn Cache, key: &'a [u8]) -> CacheLock<'a> {
        cache.lock(key).await;
        Self { cache, key }
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        self.cache.unlock(self.key);
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: Arc<Registry>,
    cache: Option<Arc<dyn Cache>>,
    callbacks: DispatchCallbacks,
    cache_ttl: Option<Duration>,
    codec: ContentCodec,
}

impl DispatcherBuilder {
    /// Response cache. Without one every call invokes the handler.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn callbacks(mut self, callbacks: DispatchCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Default TTL of cached responses; unset means no expiry.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Encoding of cached content (default JSON).
    pub fn content_codec(mut self, codec: ContentCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> Dispatcher {
        unwind::install_hook();
        Dispatcher {
            registry: self.registry,
            cache: self.cache,
            callbacks: self.callbacks,
            cache_ttl: self.cache_ttl,
            codec: self.codec,
        }
    }
}

/// Routes calls to registered versions.
///
/// `Dispatcher` holds no per-call state and can be shared behind an `Arc`.
pub struct Dispatcher {
    registry: Arc<Registry>,
    cache: Option<Arc<dyn Cache>>,
    callbacks: DispatchCallbacks,
    cache_ttl: Option<Duration>,
    codec: ContentCodec,
}

impl Dispatcher {
    pub fn builder(registry: Arc<Registry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            cache: None,
            callbacks: DispatchCallbacks::default(),
            cache_ttl: None,
            codec: ContentCodec::default(),
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn content_codec(&self) -> ContentCodec {
        self.codec
    }

    /// Resolve `route`, unmarshal its parameters from `source` and call it.
    pub async fn dispatch(
        &self,
        ctx: &CallContext,
        route: &str,
        source: &mut dyn ParameterSource,
    ) -> Result<Response, CallError> {
        let Some(version) = self.registry.find_handler_by_route(route).cloned() else {
            debug!(route, "no handler for route");
            return Err(CallError::NotFound(route.to_string()));
        };

        let request = match self.unmarshal_parameters(ctx, &version, source) {
            Ok(request) => request,
            Err(err) => {
                self.report_error(ctx, &version, &err);
                return Err(err);
            }
        };
        self.call_handler(ctx, &version, request).await
    }

    /// Read `version`'s request from `source`.
    ///
    /// In debug mode the collected parameters are recorded under `params`.
    pub fn unmarshal_parameters(
        &self,
        ctx: &CallContext,
        version: &Version,
        source: &mut dyn ParameterSource,
    ) -> Result<RequestValue, CallError> {
        let params = unmarshal(version.request(), source)?;
        ctx.debug_add("params", &params);
        let request = version.method.decode(params.clone())?;
        Ok(RequestValue { params, request })
    }

    /// Invoke `version` with an unmarshaled request, through the cache when
    /// the version, the dispatcher and the context all allow it.
    pub async fn call_handler(
        &self,
        ctx: &CallContext,
        version: &Arc<Version>,
        request: RequestValue,
    ) -> Result<Response, CallError> {
        let started = Instant::now();
        if let Some(augment) = &self.callbacks.augment_request {
            augment(ctx, version);
        }

        let result = match self.cache_for(ctx, version) {
            Some(cache) => self.call_cached(ctx, version, cache, request).await,
            None => self
                .invoke(ctx, version, request.request)
                .await
                .map(Response::fresh),
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(response) => {
                debug!(
                    route = %version.route(),
                    elapsed_us = elapsed.as_micros() as u64,
                    from_cache = response.from_cache,
                    "call succeeded"
                );
                if let Some(on_success) = &self.callbacks.on_success {
                    on_success(ctx, version, response, elapsed);
                }
            }
            Err(err) => self.report_error(ctx, version, err),
        }
        result
    }

    fn cache_for(&self, ctx: &CallContext, version: &Version) -> Option<&dyn Cache> {
        self.cache
            .as_deref()
            .filter(|_| version.use_cache() && ctx.is_cache_enabled())
    }

    fn cache_key(&self, ctx: &CallContext, version: &Version, params: &Value) -> Option<Vec<u8>> {
        if let Some(get_key) = &self.callbacks.get_cache_key {
            return get_key(ctx, version, params);
        }
        match cache_key(version.route(), params) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(route = %version.route(), %err, "cannot build cache key, calling uncached");
                None
            }
        }
    }

    async fn call_cached(
        &self,
        ctx: &CallContext,
        version: &Arc<Version>,
        cache: &dyn Cache,
        request: RequestValue,
    ) -> Result<Response, CallError> {
        let Some(key) = self.cache_key(ctx, version, &request.params) else {
            return self
                .invoke(ctx, version, request.request)
                .await
                .map(Response::fresh);
        };

        let _lock = CacheLock::acquire(cache, &key).await;
        if let Some(entry) = cache.get(&key).await {
            trace!(route = %version.route(), "cache hit");
            if let Some(on_hit) = &self.callbacks.on_cache_hit {
                on_hit(ctx, version, &entry);
            }
            return self.cached_response(ctx, entry);
        }

        trace!(route = %version.route(), "cache miss");
        if let Some(on_miss) = &self.callbacks.on_cache_miss {
            on_miss(ctx, version);
        }

        let body = self.invoke(ctx, version, request.request).await?;
        let content = self.codec.encode(&body).map_err(CallError::WriteResponse)?;
        let mut entry = CacheEntry::new(content);
        if ctx.is_etag_enabled() {
            entry.hash = Some(etag_hash(&entry.content));
        }
        entry.body = Some(body.clone());

        let entry = Arc::new(entry);
        let ttl = ctx.cache_ttl().or(self.cache_ttl);
        cache.put(&key, Arc::clone(&entry), ttl).await;

        Ok(Response {
            body,
            entry: Some(entry),
            from_cache: false,
        })
    }

    fn cached_response(
        &self,
        ctx: &CallContext,
        mut entry: Arc<CacheEntry>,
    ) -> Result<Response, CallError> {
        if ctx.is_etag_enabled() && entry.hash.is_none() {
            let hash = etag_hash(&entry.content);
            Arc::make_mut(&mut entry).hash = Some(hash);
        }
        let body = match &entry.body {
            Some(body) => body.clone(),
            None => self
                .codec
                .decode(&entry.content)
                .map_err(CallError::WriteResponse)?,
        };
        Ok(Response {
            body,
            entry: Some(entry),
            from_cache: true,
        })
    }

    /// Run the version method, converting panics into [`CallError::Panic`].
    async fn invoke(
        &self,
        ctx: &CallContext,
        version: &Arc<Version>,
        request: Box<dyn Any + Send>,
    ) -> Result<Value, CallError> {
        let method = Arc::clone(&version.method);
        let call_ctx = ctx.clone();
        let call = async move { method.invoke(call_ctx, request).await };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Outcome::Success(body)) => Ok(body),
            Ok(Outcome::Failed(MethodError::Declared(err))) => Err(CallError::Returned(err)),
            Ok(Outcome::Failed(MethodError::Other(err))) => Err(CallError::Unknown(err)),
            Ok(Outcome::Unserializable(err)) => {
                Err(CallError::WriteResponse(CodecError::Json(err)))
            }
            Err(payload) => {
                let message = unwind::panic_message(payload.as_ref());
                let trace = unwind::take_trace();
                error!(route = %version.route(), panic = %message, "handler panicked");
                if let Some(on_panic) = &self.callbacks.on_panic {
                    on_panic(ctx, version, &message, &trace);
                }
                Err(CallError::Panic { message, trace })
            }
        }
    }

    fn report_error(&self, ctx: &CallContext, version: &Version, err: &CallError) {
        match err {
            CallError::Panic { .. } => return,
            CallError::Unknown(_) | CallError::WriteResponse(_) => {
                error!(route = %version.route(), error = %err, "call failed");
            }
            _ => debug!(route = %version.route(), error = %err, "call rejected"),
        }
        if let Some(on_error) = &self.callbacks.on_error {
            on_error(ctx, version, err);
        }
    }
}
