//! Topology descriptors for the shared counter store.
//!
//! Read once at startup from the environment. Precedence when several are
//! present: cluster node list, then sentinel set, then standalone URL.

use std::fmt;

use fred::prelude::*;
use thiserror::Error;

/// Sentinel master group used when `REDIS_SENTINEL_MASTER` is unset.
pub const DEFAULT_SENTINEL_MASTER: &str = "mymaster";

/// Invalid topology configuration.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A node entry is not a `host:port` pair.
    #[error("invalid node address `{0}` (expected host:port)")]
    InvalidNode(String),
    /// A node list variable is set but contains no entries.
    #[error("{0} is set but lists no nodes")]
    EmptyNodeList(&'static str),
}

/// Address of a single store node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    /// Parses `host:port`. IPv6 hosts may be bracketed (`[::1]:6379`).
    pub fn parse(raw: &str) -> Result<Self, TopologyError> {
        let raw = raw.trim();
        let invalid = || TopologyError::InvalidNode(raw.to_string());

        let (host, port) = raw.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Deployment shape of the shared counter store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// Single node reached through a `redis://` URL.
    Standalone { url: String },
    /// Sentinel-monitored failover group.
    Sentinel {
        nodes: Vec<NodeAddr>,
        master_name: String,
    },
    /// Sharded cluster, addressed through any subset of its nodes.
    Cluster { nodes: Vec<NodeAddr> },
}

impl Topology {
    /// Short name used in logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Standalone { .. } => "standalone",
            Self::Sentinel { .. } => "sentinel",
            Self::Cluster { .. } => "cluster",
        }
    }

    /// Whether scripts must be loaded on every primary.
    pub const fn is_clustered(&self) -> bool {
        matches!(self, Self::Cluster { .. })
    }
}

/// Store connection settings.
///
/// Environment variables:
/// - `REDIS_CLUSTER_NODES`: comma-separated `host:port` list
/// - `REDIS_SENTINELS`: comma-separated `host:port` list of sentinels
/// - `REDIS_SENTINEL_MASTER`: monitored master group (default: "mymaster")
/// - `REDIS_URL`: standalone connection URL
/// - `REDIS_PASSWORD`: password for cluster and sentinel topologies
///
/// Empty values are treated as unset. When none is set, no shared store is
/// used and admission falls back to process-local counting.
#[derive(Debug, Clone, Default)]
pub struct TopologyConfig {
    pub topology: Option<Topology>,
    pub password: Option<String>,
}

impl TopologyConfig {
    /// Reads the topology from process environment variables.
    pub fn from_env() -> Result<Self, TopologyError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the topology through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TopologyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let topology = if let Some(list) = get("REDIS_CLUSTER_NODES") {
            Some(Topology::Cluster {
                nodes: parse_node_list(&list, "REDIS_CLUSTER_NODES")?,
            })
        } else if let Some(list) = get("REDIS_SENTINELS") {
            Some(Topology::Sentinel {
                nodes: parse_node_list(&list, "REDIS_SENTINELS")?,
                master_name: get("REDIS_SENTINEL_MASTER")
                    .unwrap_or_else(|| DEFAULT_SENTINEL_MASTER.to_string()),
            })
        } else {
            get("REDIS_URL").map(|url| Topology::Standalone { url })
        };

        Ok(Self {
            topology,
            password: get("REDIS_PASSWORD"),
        })
    }

    /// Builds the client configuration for the selected topology.
    ///
    /// Returns `Ok(None)` when no topology is configured.
    pub fn client_config(&self) -> Result<Option<Config>, fred::error::Error> {
        let Some(ref topology) = self.topology else {
            return Ok(None);
        };

        let config = match topology {
            Topology::Standalone { url } => Config::from_url(url)?,
            Topology::Sentinel { nodes, master_name } => Config {
                server: ServerConfig::new_sentinel(host_pairs(nodes), master_name.as_str()),
                password: self.password.clone(),
                ..Config::default()
            },
            Topology::Cluster { nodes } => Config {
                server: ServerConfig::new_clustered(host_pairs(nodes)),
                password: self.password.clone(),
                ..Config::default()
            },
        };

        Ok(Some(config))
    }
}

fn host_pairs(nodes: &[NodeAddr]) -> Vec<(&str, u16)> {
    nodes.iter().map(|n| (n.host.as_str(), n.port)).collect()
}

/// Parses a comma-separated node list, skipping blank entries.
fn parse_node_list(val: &str, var: &'static str) -> Result<Vec<NodeAddr>, TopologyError> {
    let nodes = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NodeAddr::parse)
        .collect::<Result<Vec<_>, _>>()?;

    if nodes.is_empty() {
        return Err(TopologyError::EmptyNodeList(var));
    }
    Ok(nodes)
}
