//! Process-local fixed-window counters.
//!
//! Used when no shared store is configured, or for a single call when the
//! store fails and the failure policy is `local`. State is invisible to
//! other replicas, so each replica is only protected individually.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::ratelimit::{BucketState, MAX_WINDOW_SECS};

#[derive(Debug, Clone, Copy)]
struct LocalBucket {
    count: u64,
    reset_at: Instant,
}

/// In-memory map of `key -> {count, reset_at}`.
///
/// Increments on one key are serialized by the map's shard lock, so
/// concurrent callers never lose or double count.
#[derive(Debug, Default)]
pub struct LocalLimiter {
    buckets: DashMap<String, LocalBucket>,
}

impl LocalLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request against `key`.
    pub fn increment(&self, key: &str, window: Duration) -> BucketState {
        self.increment_at(key, window, Instant::now())
    }

    /// Counts one request against `key` as of `now`.
    ///
    /// An absent or expired bucket is replaced with a fresh one whose reset
    /// time is `now + window`; the reset time of a live bucket never moves.
    /// Windows longer than [`MAX_WINDOW_SECS`] are capped.
    pub fn increment_at(&self, key: &str, window: Duration, now: Instant) -> BucketState {
        let window = window.min(Duration::from_secs(MAX_WINDOW_SECS));
        let fresh = LocalBucket {
            count: 0,
            reset_at: now.checked_add(window).unwrap_or(now),
        };

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(fresh);
        if bucket.reset_at <= now {
            *bucket = fresh;
        }
        bucket.count += 1;

        BucketState {
            count: bucket.count,
            ttl: bucket.reset_at.saturating_duration_since(now),
        }
    }

    /// Removes expired buckets, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at > now);
        before.saturating_sub(self.buckets.len())
    }

    /// Number of tracked buckets, expired or not.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawns a task that purges expired buckets every `interval`.
    ///
    /// The task holds a weak reference and exits once the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let purged = limiter.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = limiter.len(), "Swept expired local buckets");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_first_increment_creates_bucket() {
        let limiter = LocalLimiter::new();
        let now = Instant::now();

        let state = limiter.increment_at("k1", WINDOW, now);
        assert_eq!(state.count, 1);
        assert_eq!(state.ttl, WINDOW);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_reset_time_is_fixed() {
        let limiter = LocalLimiter::new();
        let start = Instant::now();

        limiter.increment_at("k1", WINDOW, start);
        let later = limiter.increment_at("k1", WINDOW, start + Duration::from_secs(20));

        assert_eq!(later.count, 2);
        assert_eq!(later.ttl, Duration::from_secs(40));
    }

    #[test]
    fn test_expired_bucket_starts_over() {
        let limiter = LocalLimiter::new();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.increment_at("k1", WINDOW, start);
        }
        let after = limiter.increment_at("k1", WINDOW, start + WINDOW);

        assert_eq!(after.count, 1);
        assert_eq!(after.ttl, WINDOW);
    }

    #[test]
    fn test_oversized_window_is_capped() {
        let limiter = LocalLimiter::new();
        let now = Instant::now();
        let cap = Duration::from_secs(MAX_WINDOW_SECS);

        let state = limiter.increment_at("k1", Duration::from_secs(u64::MAX), now);
        assert_eq!(state.count, 1);
        assert_eq!(state.ttl, cap);

        let state = limiter.increment("k2", Duration::MAX);
        assert_eq!(state.count, 1);
        assert!(state.ttl <= cap);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = LocalLimiter::new();
        let now = Instant::now();

        limiter.increment_at("k1", WINDOW, now);
        limiter.increment_at("k1", WINDOW, now);
        let other = limiter.increment_at("k2", WINDOW, now);

        assert_eq!(other.count, 1);
    }

    #[test]
    fn test_purge_expired() {
        let limiter = LocalLimiter::new();
        let start = Instant::now();

        limiter.increment_at("old", Duration::from_secs(1), start);
        limiter.increment_at("live", WINDOW, start);

        assert_eq!(limiter.purge_expired_at(start + Duration::from_secs(2)), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.increment_at("live", WINDOW, start).count, 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let limiter = Arc::new(LocalLimiter::new());
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        limiter.increment("shared", WINDOW);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let state = limiter.increment("shared", WINDOW);
        assert_eq!(state.count, threads * per_thread + 1);
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_buckets() {
        let limiter = Arc::new(LocalLimiter::new());
        limiter.increment("short", Duration::from_millis(10));

        let handle = limiter.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(limiter.is_empty());
        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit once the limiter is dropped")
            .unwrap();
    }
}
