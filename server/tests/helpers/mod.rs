//! Reusable test helpers for HTTP integration tests.
//!
//! ## Test Servers
//!
//! Use [`spawn_test_server()`] when you need stateful middleware testing
//! (admission control) instead of `tower::ServiceExt::oneshot`.
//!
//! ## Shared Store
//!
//! Use [`test_selector()`] for tests that talk to Redis. The URL is read from
//! `REDIS_URL` and defaults to `redis://localhost:6379`.
#![allow(dead_code)]

use std::net::SocketAddr;

use axum::Router;
use gk_server::ratelimit::{LimitConfig, RateLimitConfig};
use gk_server::store::{Topology, TopologyConfig, TopologySelector};
use tokio::task::JoinHandle;

/// Default Redis URL for integration tests.
pub const DEFAULT_TEST_REDIS_URL: &str = "redis://localhost:6379";

/// A running test server bound to a random port.
pub struct TestServer {
    /// Server address (127.0.0.1:PORT).
    pub addr: SocketAddr,
    /// Base URL for HTTP requests (e.g., `http://127.0.0.1:12345`).
    pub url: String,
    /// Handle to the server task for cleanup.
    _handle: JoinHandle<()>,
}

/// Spawn a real HTTP server on a random port.
///
/// Use this instead of `oneshot` when testing stateful middleware behavior
/// since `oneshot` gives no peer address and resets per-router state.
///
/// # Example
///
/// ```ignore
/// let server = spawn_test_server(create_router(state)).await;
///
/// let client = reqwest::Client::new();
/// let resp = client.get(format!("{}/health", server.url)).send().await?;
/// ```
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Test server failed");
    });

    TestServer {
        addr,
        url,
        _handle: handle,
    }
}

/// Selector pointed at the test Redis instance.
pub fn test_selector() -> TopologySelector {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_TEST_REDIS_URL.to_string());
    TopologySelector::new(TopologyConfig {
        topology: Some(Topology::Standalone { url }),
        password: None,
    })
}

/// Admission settings with a unique key prefix so test runs never collide.
pub fn test_rate_limit_config(requests: u32, window_secs: u64) -> RateLimitConfig {
    RateLimitConfig {
        enabled: true,
        redis_key_prefix: unique_prefix(),
        limit: LimitConfig::per_secs(requests, window_secs),
        ..RateLimitConfig::default()
    }
}

/// A key prefix no other test uses.
pub fn unique_prefix() -> String {
    format!("test:rl:{}", uuid::Uuid::new_v4())
}
