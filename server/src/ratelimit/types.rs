//! Rate limiting types.

use std::time::Duration;

/// Outcome of one admission check.
///
/// Carries no counter state; callers only learn whether to proceed and how
/// long to wait otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole seconds until the bucket resets (0 if allowed)
    pub retry_after_secs: u64,
}

impl Decision {
    /// A permitting decision.
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    /// A rejecting decision with the given wait hint.
    pub const fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
        }
    }
}

/// Counter state returned by one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Post-increment count within the current window
    pub count: u64,
    /// Time left until the bucket expires
    pub ttl: Duration,
}

/// What to do when the shared store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Allow the request.
    #[default]
    Open,
    /// Count the request in the process-local limiter instead.
    Local,
}

impl FailurePolicy {
    /// Parses `open` or `local` (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Built-in bucket key derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// One bucket per normalized client IP.
    #[default]
    Ip,
    /// One bucket per account, falling back to the client IP.
    Account,
}

impl KeyStrategy {
    /// Parses `ip` or `account` (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_ascii_lowercase().as_str() {
            "ip" => Some(Self::Ip),
            "account" | "user" => Some(Self::Account),
            _ => None,
        }
    }
}

/// Normalized IP address stored in request extensions.
///
/// IPv4 addresses are stored as-is.
/// IPv6 addresses are normalized to /64 prefix for rate limiting.
#[derive(Debug, Clone)]
pub struct NormalizedIp(pub String);

/// Authenticated account id, inserted into request extensions by an
/// upstream authentication layer.
#[derive(Debug, Clone)]
pub struct AccountId(pub String);
