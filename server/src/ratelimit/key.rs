//! Bucket key derivation.
//!
//! The gate only sees a request through a [`RequestContext`]; a [`KeyFn`]
//! turns that context into the key of the bucket the request is counted in.

use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::ratelimit::constants::IPV6_PREFIX_SEGMENTS;
use crate::ratelimit::KeyStrategy;

/// Identifying attributes of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Normalized client address (see [`normalize_ip`])
    pub client_ip: String,
    /// Account id set by an upstream authentication layer
    pub account_id: Option<String>,
    /// Request path
    pub path: String,
}

impl RequestContext {
    /// Context for an anonymous caller.
    pub fn from_ip(client_ip: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            account_id: None,
            path: String::new(),
        }
    }

    /// Context for a request as seen on the wire: the client address is
    /// resolved and normalized, no account is attached.
    pub fn resolve(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        trust_proxy: bool,
        path: &str,
    ) -> Self {
        Self {
            client_ip: normalize_ip(extract_client_ip(headers, peer, trust_proxy)),
            account_id: None,
            path: path.to_string(),
        }
    }

    /// Attaches an account id.
    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }
}

/// Pluggable bucket key derivation.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// One bucket per client address.
pub fn key_by_ip() -> KeyFn {
    Arc::new(|ctx: &RequestContext| format!("ip:{}", ctx.client_ip))
}

/// One bucket per account; anonymous callers are keyed by address.
pub fn key_by_account() -> KeyFn {
    Arc::new(|ctx: &RequestContext| match ctx.account_id {
        Some(ref id) => format!("user:{id}"),
        None => format!("ip:{}", ctx.client_ip),
    })
}

impl KeyStrategy {
    /// The key function for this strategy.
    pub fn key_fn(self) -> KeyFn {
        match self {
            Self::Ip => key_by_ip(),
            Self::Account => key_by_account(),
        }
    }
}

/// Resolves the address a request is attributed to.
///
/// Behind a trusted proxy the first X-Forwarded-For hop wins, then X-Real-IP.
/// Otherwise only the peer address is used; without one, loopback.
pub fn extract_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> IpAddr {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let parse = |raw: &str| raw.trim().parse::<IpAddr>().ok();

    if trust_proxy {
        let proxied = header("X-Forwarded-For")
            .and_then(|v| v.split(',').next())
            .and_then(parse)
            .or_else(|| header("X-Real-IP").and_then(parse));
        if let Some(ip) = proxied {
            return ip;
        }
    }

    peer.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip())
}

/// Canonical bucket form of an address.
///
/// IPv4-mapped IPv6 addresses are unwrapped; other IPv6 addresses collapse
/// to their /64 prefix.
pub fn normalize_ip(ip: IpAddr) -> String {
    let v6 = match ip {
        IpAddr::V4(v4) => return v4.to_string(),
        IpAddr::V6(v6) => v6,
    };
    if let Some(v4) = v6.to_ipv4_mapped() {
        return v4.to_string();
    }

    let mut prefix = String::with_capacity(24);
    for segment in &v6.segments()[..IPV6_PREFIX_SEGMENTS] {
        let _ = write!(prefix, "{segment:x}:");
    }
    prefix.push_str(":/64");
    prefix
}
