//! Shared Counter Store
//!
//! Owns the single Redis client a process uses for admission counters.
//!
//! The client is created on first use, reused for the rest of the process
//! lifetime, and closed on shutdown. Connectivity is not awaited here.
//! Every command carries the selector's command timeout and the client's
//! offline buffer is bounded, so a command the caller has given up on is
//! dropped by the client instead of being replayed after a reconnect.

mod topology;

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub use topology::{NodeAddr, Topology, TopologyConfig, TopologyError, DEFAULT_SENTINEL_MASTER};

/// Reconnect backoff bounds (milliseconds).
const RECONNECT_MIN_DELAY_MS: u32 = 100;
const RECONNECT_MAX_DELAY_MS: u32 = 5_000;

/// Per-command timeout used when none is given.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 250;

/// Commands held while the connection is down; beyond this they fail fast.
const MAX_COMMAND_BUFFER_LEN: usize = 1_024;

/// Handle to the shared store for one topology.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    clustered: bool,
    kind: &'static str,
}

impl StoreClient {
    /// The underlying multiplexed Redis client.
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Whether the store is a sharded cluster.
    pub const fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Topology name, for logs.
    pub const fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Process-wide selector for the shared store client.
///
/// Cloning is cheap; all clones share the same cached client.
#[derive(Clone)]
pub struct TopologySelector {
    inner: Arc<SelectorInner>,
}

struct SelectorInner {
    config: TopologyConfig,
    command_timeout: Duration,
    client: OnceCell<Option<StoreClient>>,
}

impl TopologySelector {
    /// Creates a selector with the default command timeout.
    /// No connection is made until [`Self::client`] is called.
    pub fn new(config: TopologyConfig) -> Self {
        Self::with_command_timeout(config, Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS))
    }

    /// Creates a selector whose client abandons any command not answered
    /// within `command_timeout`.
    pub fn with_command_timeout(config: TopologyConfig, command_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SelectorInner {
                config,
                command_timeout,
                client: OnceCell::new(),
            }),
        }
    }

    /// Timeout applied to every command sent by the client.
    pub fn command_timeout(&self) -> Duration {
        self.inner.command_timeout
    }

    /// A selector with no shared store configured.
    pub fn unconfigured() -> Self {
        Self::new(TopologyConfig::default())
    }

    /// Returns the store client, building it on the first call.
    ///
    /// Returns `None` when no topology is configured or the configuration
    /// could not be turned into a client. The outcome is cached either way.
    pub async fn client(&self) -> Option<StoreClient> {
        self.inner
            .client
            .get_or_init(|| async { connect(&self.inner.config, self.inner.command_timeout) })
            .await
            .clone()
    }

    /// Name of the selected topology, or `"local"` when there is no shared
    /// store. Builds the client if needed.
    pub async fn topology_kind(&self) -> &'static str {
        self.client().await.map_or("local", |store| store.kind())
    }

    /// Closes the store connection if one was ever opened.
    pub async fn shutdown(&self) {
        let Some(Some(store)) = self.inner.client.get() else {
            return;
        };

        if let Err(e) = store.client.quit().await {
            warn!(error = %e, "Failed to close shared store connection");
        } else {
            info!(topology = store.kind, "Shared store connection closed");
        }
    }
}

/// Builds and starts the client for the configured topology.
fn connect(config: &TopologyConfig, command_timeout: Duration) -> Option<StoreClient> {
    let Some(ref topology) = config.topology else {
        info!("No shared store configured, using process-local admission counters");
        return None;
    };

    let client_config = match config.client_config() {
        Ok(Some(c)) => c,
        Ok(None) => return None,
        Err(e) => {
            error!(
                topology = topology.kind(),
                error = %e,
                "Invalid shared store configuration, using process-local admission counters"
            );
            return None;
        }
    };

    let policy =
        ReconnectPolicy::new_exponential(0, RECONNECT_MIN_DELAY_MS, RECONNECT_MAX_DELAY_MS, 2);
    let (perf, connection) = client_settings(command_timeout);
    let client = Client::new(client_config, Some(perf), Some(connection), Some(policy));
    // Readiness is validated per request.
    let _connection = client.connect();

    info!(
        topology = topology.kind(),
        command_timeout_ms = command_timeout.as_millis() as u64,
        "Shared store client created"
    );
    Some(StoreClient {
        client,
        clustered: topology.is_clustered(),
        kind: topology.kind(),
    })
}

/// Client tuning: commands time out inside the client, are attempted once,
/// and the buffer used while disconnected is bounded.
fn client_settings(command_timeout: Duration) -> (PerformanceConfig, ConnectionConfig) {
    let perf = PerformanceConfig {
        default_command_timeout: command_timeout,
        ..PerformanceConfig::default()
    };
    let connection = ConnectionConfig {
        max_command_attempts: 1,
        max_command_buffer_len: MAX_COMMAND_BUFFER_LEN,
        ..ConnectionConfig::default()
    };
    (perf, connection)
}
