//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

use crate::ratelimit::RateLimitConfig;
use crate::store::TopologyConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Shared counter store topology (none means process-local counting)
    pub store: TopologyConfig,

    /// Admission control settings
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// See [`TopologyConfig::from_env`] and [`RateLimitConfig::from_env`] for
    /// the variables each part reads.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            store: TopologyConfig::from_env().context("Invalid shared store topology")?,
            rate_limit: RateLimitConfig::from_env(),
        })
    }

    /// Check if a shared counter store is configured.
    #[must_use]
    pub const fn has_store(&self) -> bool {
        self.store.topology.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// No shared store is configured. Tests that need Redis point
    /// `REDIS_URL` at a local instance:
    /// - Redis: `docker run -d --name gk-test-redis -p 6379:6379 redis:7`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            store: TopologyConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
