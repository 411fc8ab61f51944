//! Redis-backed fixed-window counters.
//!
//! Increments run as a single Lua script (INCR, PEXPIRE on creation, PTTL)
//! so concurrent replicas cannot race on the window boundary. If the store
//! refuses to register the script, increments fall back to separate INCR
//! and PEXPIRE calls. The strategy is probed on first use and kept for the
//! lifetime of the client.

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::ratelimit::{
    BucketState, CounterBackend, StoreError, REDIS_KEY_CAPACITY, TTL_KEY_NOT_FOUND, TTL_NO_EXPIRY,
};
use crate::store::StoreClient;

/// Embedded Lua script for the atomic fixed-window increment.
const FIXED_WINDOW_SCRIPT: &str = include_str!("fixed_window.lua");

/// How one increment is carried out against the store.
trait IncrementStrategy: Send + Sync {
    fn increment<'a>(
        &'a self,
        store: &'a StoreClient,
        key: &'a str,
        window_ms: i64,
    ) -> BoxFuture<'a, Result<BucketState, StoreError>>;

    fn name(&self) -> &'static str;
}

/// Counter backed by the shared Redis store.
pub struct RedisCounter {
    store: StoreClient,
    key_prefix: String,
    strategy: OnceCell<Arc<dyn IncrementStrategy>>,
}

impl RedisCounter {
    /// Creates a counter. The increment strategy is probed on first use.
    pub fn new(store: StoreClient, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            strategy: OnceCell::new(),
        }
    }

    /// A counter that always uses the two-call strategy.
    #[cfg(test)]
    fn with_two_call(store: StoreClient, key_prefix: impl Into<String>) -> Self {
        let strategy: Arc<dyn IncrementStrategy> = Arc::new(TwoStepIncrement);
        Self {
            store,
            key_prefix: key_prefix.into(),
            strategy: OnceCell::new_with(Some(strategy)),
        }
    }

    /// Name of the selected strategy, if one has been probed yet.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.strategy.get().map(|s| s.name())
    }

    /// Returns the cached strategy, probing the store on first call.
    ///
    /// Transient failures during the probe are returned and not cached, so
    /// the next call probes again.
    async fn strategy(&self) -> Result<&Arc<dyn IncrementStrategy>, StoreError> {
        self.strategy.get_or_try_init(|| probe(&self.store)).await
    }

    /// Builds a Redis key with the configured prefix.
    fn build_key(&self, key: &str) -> String {
        let mut full = String::with_capacity(REDIS_KEY_CAPACITY);
        full.push_str(&self.key_prefix);
        full.push(':');
        full.push_str(key);
        full
    }
}

impl CounterBackend for RedisCounter {
    fn increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<BucketState, StoreError>> {
        async move {
            let strategy = self.strategy().await?;
            let key = self.build_key(key);
            let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
            strategy.increment(&self.store, &key, window_ms).await
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Registers the script, choosing the two-call strategy if the store rejects it.
async fn probe(store: &StoreClient) -> Result<Arc<dyn IncrementStrategy>, StoreError> {
    match load_script(store).await {
        Ok(sha) => {
            info!(sha = %sha, topology = store.kind(), "Fixed-window script loaded");
            Ok(Arc::new(ScriptedIncrement {
                sha: RwLock::new(sha),
            }))
        }
        Err(e) if is_transient(&e) => Err(StoreError::Unavailable(e)),
        Err(e) => {
            warn!(
                error = %e,
                topology = store.kind(),
                "Script registration rejected, using two-call increments"
            );
            Ok(Arc::new(TwoStepIncrement))
        }
    }
}

/// Loads the script and returns its SHA. On a cluster it is loaded on every primary.
async fn load_script(store: &StoreClient) -> Result<String, Error> {
    let client = store.client();
    if store.is_clustered() {
        let _: () = client.script_load_cluster(FIXED_WINDOW_SCRIPT).await?;
    }
    client.script_load(FIXED_WINDOW_SCRIPT).await
}

/// Errors that say nothing about whether the store supports scripting.
fn is_transient(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::IO
            | ErrorKind::Timeout
            | ErrorKind::Canceled
            | ErrorKind::Backpressure
            | ErrorKind::Cluster
            | ErrorKind::Sentinel
            | ErrorKind::Routing
    )
}

/// Checks if an error is a NOSCRIPT error (script not found in Redis).
fn is_noscript_error(error: &Error) -> bool {
    error.to_string().contains("NOSCRIPT")
}

/// Converts a `{count, ttl_ms}` reply into bucket state.
fn parse_reply(reply: &[i64], window_ms: i64) -> Result<BucketState, StoreError> {
    let [count, ttl_ms] = reply else {
        return Err(StoreError::MalformedReply(format!("{reply:?}")));
    };
    let count = u64::try_from(*count)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| StoreError::MalformedReply(format!("{reply:?}")))?;

    Ok(BucketState {
        count,
        ttl: ttl_from_pttl(*ttl_ms, window_ms),
    })
}

/// Maps a PTTL reply to a duration. A key without expiry is treated as a
/// fresh window; a key that vanished between calls as already expired.
fn ttl_from_pttl(pttl: i64, window_ms: i64) -> Duration {
    let ms = match pttl {
        TTL_NO_EXPIRY => window_ms,
        TTL_KEY_NOT_FOUND => 0,
        ms => ms.max(0),
    };
    Duration::from_millis(ms as u64)
}

/// Single round trip through the registered script.
struct ScriptedIncrement {
    sha: RwLock<String>,
}

impl ScriptedIncrement {
    async fn evalsha(
        &self,
        store: &StoreClient,
        key: &str,
        window_ms: i64,
    ) -> Result<Vec<i64>, Error> {
        let sha = self.sha.read().await.clone();
        store
            .client()
            .evalsha(sha.as_str(), vec![key], vec![window_ms])
            .await
    }
}

impl IncrementStrategy for ScriptedIncrement {
    fn increment<'a>(
        &'a self,
        store: &'a StoreClient,
        key: &'a str,
        window_ms: i64,
    ) -> BoxFuture<'a, Result<BucketState, StoreError>> {
        async move {
            let reply = match self.evalsha(store, key, window_ms).await {
                Ok(r) => r,
                Err(e) if is_noscript_error(&e) => {
                    // Script cache flushed or failover to a node without it.
                    warn!("NOSCRIPT error, reloading fixed-window script");
                    let sha = load_script(store).await?;
                    *self.sha.write().await = sha;
                    self.evalsha(store, key, window_ms).await?
                }
                Err(e) => return Err(e.into()),
            };
            parse_reply(&reply, window_ms)
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "script"
    }
}

/// INCR followed by PEXPIRE on the first increment.
///
/// Not atomic: two replicas racing on a new bucket may both set the expiry,
/// which can stretch that one window slightly but never loses a count.
struct TwoStepIncrement;

impl IncrementStrategy for TwoStepIncrement {
    fn increment<'a>(
        &'a self,
        store: &'a StoreClient,
        key: &'a str,
        window_ms: i64,
    ) -> BoxFuture<'a, Result<BucketState, StoreError>> {
        async move {
            let client = store.client();
            let count: i64 = client.incr(key).await?;

            let pttl = if count == 1 {
                TTL_NO_EXPIRY
            } else {
                client.pttl(key).await?
            };

            if pttl == TTL_NO_EXPIRY {
                debug!(key = %key, "Setting bucket expiry");
                let _: () = client.pexpire(key, window_ms, None).await?;
            }

            parse_reply(&[count, pttl], window_ms)
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "two-call"
    }
}
