//! Admission gate.
//!
//! The single entry point for admission checks. Every check performs one
//! counter mutation, against the shared store when one is configured and
//! against the process-local limiter otherwise, and yields a [`Decision`].
//! Store failures never escape: they are logged and resolved according to
//! the configured [`FailurePolicy`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::ratelimit::{
    retry_after_secs, BucketState, CounterBackend, Decision, FailurePolicy, KeyFn, LocalLimiter,
    RateLimitConfig, RedisCounter, RequestContext, StoreError, MAX_WINDOW_SECS,
};
use crate::store::TopologySelector;

/// Admission gate shared by every request handler.
///
/// Cheap to clone; clones share the store client and the local map.
#[derive(Clone)]
pub struct AdmissionGate {
    store: Option<Arc<dyn CounterBackend>>,
    local: Arc<LocalLimiter>,
    config: Arc<RateLimitConfig>,
    key_fn: KeyFn,
}

impl AdmissionGate {
    /// Creates a gate over the selector's store client, or over the local
    /// limiter if no store is configured.
    ///
    /// Buckets are keyed with the configured [`KeyStrategy`].
    ///
    /// [`KeyStrategy`]: crate::ratelimit::KeyStrategy
    pub async fn new(selector: &TopologySelector, config: RateLimitConfig) -> Self {
        let key_fn = config.key_strategy.key_fn();
        Self::with_key_fn(selector, config, key_fn).await
    }

    /// Same as [`Self::new`] with a custom key function.
    pub async fn with_key_fn(
        selector: &TopologySelector,
        config: RateLimitConfig,
        key_fn: KeyFn,
    ) -> Self {
        let store = selector.client().await.map(|client| {
            Arc::new(RedisCounter::new(client, config.redis_key_prefix.clone()))
                as Arc<dyn CounterBackend>
        });
        Self::with_backend(store, config, key_fn)
    }

    /// Creates a gate over an arbitrary counter backend.
    ///
    /// Windows longer than [`MAX_WINDOW_SECS`] are capped.
    pub fn with_backend(
        store: Option<Arc<dyn CounterBackend>>,
        mut config: RateLimitConfig,
        key_fn: KeyFn,
    ) -> Self {
        let max_window = Duration::from_secs(MAX_WINDOW_SECS);
        if config.limit.window > max_window {
            warn!(
                window_secs = config.limit.window.as_secs(),
                max_window_secs = MAX_WINDOW_SECS,
                "Rate limit window too long, capping"
            );
            config.limit.window = max_window;
        }

        Self {
            store,
            local: Arc::new(LocalLimiter::new()),
            config: Arc::new(config),
            key_fn,
        }
    }

    /// Returns the configuration for this gate.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The process-local limiter (fallback counters).
    pub fn local(&self) -> &Arc<LocalLimiter> {
        &self.local
    }

    /// Name of the backend counting requests, for logs.
    pub fn backend_name(&self) -> &'static str {
        self.store.as_ref().map_or("local", |s| s.name())
    }

    /// Decides whether the request described by `ctx` may proceed.
    pub async fn check(&self, ctx: &RequestContext) -> Decision {
        let key = (self.key_fn)(ctx);
        self.check_key(&key).await
    }

    /// Decides for an already-derived bucket key.
    #[tracing::instrument(skip(self), fields(backend = self.backend_name()))]
    pub async fn check_key(&self, key: &str) -> Decision {
        let window = self.config.limit.window;

        let Some(ref store) = self.store else {
            return self.decide(key, self.local.increment(key, window));
        };

        let result = tokio::time::timeout(self.config.store_timeout, store.increment(key, window))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout)));

        match result {
            Ok(bucket) => self.decide(key, bucket),
            Err(e) => self.on_store_failure(key, &e),
        }
    }

    fn on_store_failure(&self, key: &str, error: &StoreError) -> Decision {
        match self.config.on_store_failure {
            FailurePolicy::Open => {
                warn!(
                    key = %key,
                    error = %error,
                    "Shared store unavailable, allowing request (fail open)"
                );
                Decision::allow()
            }
            FailurePolicy::Local => {
                warn!(
                    key = %key,
                    error = %error,
                    "Shared store unavailable, counting request locally"
                );
                self.decide(key, self.local.increment(key, self.config.limit.window))
            }
        }
    }

    fn decide(&self, key: &str, bucket: BucketState) -> Decision {
        if bucket.count <= u64::from(self.config.limit.requests) {
            return Decision::allow();
        }

        let retry_after = retry_after_secs(bucket.ttl);
        debug!(key = %key, retry_after, "Rate limit exceeded");
        Decision::deny(retry_after)
    }
}
