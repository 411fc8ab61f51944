//! Rate limiting constants.

/// Default Redis key prefix for admission buckets
pub const DEFAULT_KEY_PREFIX: &str = "gk:rl";

/// Default admission ceiling and window
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Longest accepted window (365 days)
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound on a single shared store round trip
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;

/// Interval between sweeps of expired local buckets
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// IPv6 prefix segments for rate limiting (uses /64)
pub const IPV6_PREFIX_SEGMENTS: usize = 4;

/// Redis key pre-allocation size
pub const REDIS_KEY_CAPACITY: usize = 64;

/// Redis PTTL sentinel values
pub const TTL_NO_EXPIRY: i64 = -1;
pub const TTL_KEY_NOT_FOUND: i64 = -2;
