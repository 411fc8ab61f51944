//! Rate limiting configuration.

use std::time::Duration;

use crate::ratelimit::{
    FailurePolicy, KeyStrategy, DEFAULT_KEY_PREFIX, DEFAULT_MAX_REQUESTS,
    DEFAULT_STORE_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_WINDOW_SECS, MAX_WINDOW_SECS,
};

/// Configuration for the admission gate.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Prefix for Redis keys (e.g., "gk:rl")
    pub redis_key_prefix: String,
    /// Ceiling and window applied to every bucket
    pub limit: LimitConfig,
    /// Upper bound on one shared store call
    pub store_timeout: Duration,
    /// Behavior when the shared store cannot answer
    pub on_store_failure: FailurePolicy,
    /// Whether to trust X-Forwarded-For headers
    pub trust_proxy: bool,
    /// Built-in bucket key derivation
    pub key_strategy: KeyStrategy,
    /// Interval between sweeps of expired local buckets
    pub sweep_interval: Duration,
}

/// Configuration for a single fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub requests: u32,
    /// Window duration
    pub window: Duration,
}

impl LimitConfig {
    /// Limit with a window given in whole seconds.
    pub const fn per_secs(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self::per_secs(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            limit: LimitConfig::default(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            on_store_failure: FailurePolicy::default(),
            trust_proxy: false,
            key_strategy: KeyStrategy::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl RateLimitConfig {
    /// Creates configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RATE_LIMIT_ENABLED`: Enable/disable rate limiting (default: true)
    /// - `RATE_LIMIT`: Limit as "requests,window_secs" (default: "100,60")
    /// - `RATE_LIMIT_PREFIX`: Redis key prefix (default: "gk:rl")
    /// - `RATE_LIMIT_STORE_TIMEOUT_MS`: Shared store call timeout (default: 250)
    /// - `RATE_LIMIT_ON_STORE_FAILURE`: "open" or "local" (default: "open")
    /// - `RATE_LIMIT_TRUST_PROXY`: Trust X-Forwarded-For headers (default: false)
    /// - `RATE_LIMIT_KEY`: "ip" or "account" (default: "ip")
    /// - `RATE_LIMIT_SWEEP_SECS`: Local bucket sweep interval (default: 60)
    ///
    /// Unparseable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("RATE_LIMIT_ENABLED") {
            config.enabled = val.trim().parse().unwrap_or(true);
        }
        if let Some(val) = lookup("RATE_LIMIT") {
            if let Some(limit) = parse_limit_config(&val) {
                config.limit = limit;
            }
        }
        if let Some(val) = lookup("RATE_LIMIT_PREFIX") {
            if !val.trim().is_empty() {
                config.redis_key_prefix = val.trim().to_string();
            }
        }
        if let Some(val) = lookup("RATE_LIMIT_STORE_TIMEOUT_MS") {
            if let Some(ms) = val.trim().parse::<u64>().ok().filter(|ms| *ms > 0) {
                config.store_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(val) = lookup("RATE_LIMIT_ON_STORE_FAILURE") {
            if let Some(policy) = FailurePolicy::parse(&val) {
                config.on_store_failure = policy;
            }
        }
        if let Some(val) = lookup("RATE_LIMIT_TRUST_PROXY") {
            config.trust_proxy = val.trim().parse().unwrap_or(false);
        }
        if let Some(val) = lookup("RATE_LIMIT_KEY") {
            if let Some(strategy) = KeyStrategy::parse(&val) {
                config.key_strategy = strategy;
            }
        }
        if let Some(val) = lookup("RATE_LIMIT_SWEEP_SECS") {
            if let Some(secs) = val.trim().parse::<u64>().ok().filter(|s| *s > 0) {
                config.sweep_interval = Duration::from_secs(secs);
            }
        }

        config
    }
}

/// Parses a limit config from "requests,window_secs" format.
///
/// Windows of zero or longer than [`MAX_WINDOW_SECS`] are rejected.
fn parse_limit_config(val: &str) -> Option<LimitConfig> {
    let parts: Vec<&str> = val.split(',').collect();
    if parts.len() == 2 {
        let requests = parts[0].trim().parse().ok()?;
        let window_secs: u64 = parts[1].trim().parse().ok()?;
        if window_secs == 0 || window_secs > MAX_WINDOW_SECS {
            return None;
        }
        Some(LimitConfig::per_secs(requests, window_secs))
    } else {
        None
    }
}
