//! Shared counter backends.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::ratelimit::{BucketState, StoreError};

/// A counter store that increments fixed-window buckets atomically.
///
/// Implementations report every failure as a [`StoreError`]; deciding what a
/// failure means for admission is left to the gate.
pub trait CounterBackend: Send + Sync {
    /// Increments `key`, starting a window of `window` if the bucket is new.
    fn increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<BucketState, StoreError>>;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

/// Whole seconds until `ttl` elapses, rounded up.
pub fn retry_after_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}
