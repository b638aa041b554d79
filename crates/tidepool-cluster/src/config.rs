//! Cluster configuration snapshots.
//!
//! The field names deserialize straight from the JSON the configuration
//! endpoints stream, so a snapshot is one `serde_json::from_*` call away
//! from routing.

use std::fmt;

use serde::Deserialize;

use crate::error::TopologyError;

/// Which port of a classic node descriptor the client should dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortType {
    #[default]
    Direct,
    /// A server-side moxi/proxy port in front of the node.
    Proxy,
}

/// `host:port` pair for one cache node.
///
/// Kept unresolved — name resolution belongs to the connection layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses the `host:port` form used in vbucket server lists.
    pub fn parse(s: &str) -> Result<Self, TopologyError> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TopologyError::InvalidConfiguration(format!(
                "endpoint '{s}' is missing a port"
            )))?;
        if host.is_empty() {
            return Err(TopologyError::InvalidConfiguration(format!(
                "endpoint '{s}' is missing a host"
            )));
        }
        let port = port.parse::<u16>().map_err(|_| {
            TopologyError::InvalidConfiguration(format!("endpoint '{s}' has a bad port"))
        })?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One configuration snapshot, in either the classic or the vbucket form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    /// Classic node descriptors. Ignored when a vbucket map is present.
    pub nodes: Vec<NodeConfig>,
    /// Partition map for vbucket deployments.
    pub v_bucket_server_map: Option<VBucketServerMap>,
}

impl ClusterConfig {
    /// Endpoints of the healthy classic nodes, dialing the chosen port.
    pub fn healthy_endpoints(&self, port_type: PortType) -> Vec<NodeEndpoint> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Healthy)
            .map(|n| {
                let port = match port_type {
                    PortType::Proxy => n.ports.proxy,
                    PortType::Direct => n.ports.direct,
                };
                NodeEndpoint::new(n.host(), port)
            })
            .collect()
    }
}

/// A classic node descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Host name, possibly suffixed with the admin port (`"cache1:8091"`).
    pub hostname: String,
    pub ports: NodePorts,
    #[serde(default)]
    pub status: NodeStatus,
}

impl NodeConfig {
    /// The host name with any admin-port suffix stripped.
    pub fn host(&self) -> &str {
        self.hostname
            .split_once(':')
            .map_or(self.hostname.as_str(), |(host, _)| host)
    }
}

/// Cache ports advertised by a classic node.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NodePorts {
    pub proxy: u16,
    pub direct: u16,
}

/// Health as reported by the configuration endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
    /// Anything this client does not recognize; treated as not routable.
    #[default]
    #[serde(other)]
    Unknown,
}

/// The server-supplied partition map of a vbucket deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VBucketServerMap {
    pub hash_algorithm: String,
    /// Ordered `host:port` strings; map entries index into this list.
    pub server_list: Vec<String>,
    /// One row per bucket: `[master, replica, replica, …]`. A negative
    /// index means the seat is currently unassigned.
    pub v_bucket_map: Vec<Vec<i32>>,
    /// Pending map during a rebalance window.
    #[serde(default)]
    pub v_bucket_map_forward: Option<Vec<Vec<i32>>>,
}

impl VBucketServerMap {
    /// Parses the server list into endpoints, preserving order.
    pub fn endpoints(&self) -> Result<Vec<NodeEndpoint>, TopologyError> {
        self.server_list.iter().map(|s| NodeEndpoint::parse(s)).collect()
    }

    /// The forward map as a standalone server map, if the snapshot carries
    /// one. Server list and hash algorithm are shared with the live map.
    pub fn forward(&self) -> Option<VBucketServerMap> {
        self.v_bucket_map_forward.as_ref().map(|rows| VBucketServerMap {
            hash_algorithm: self.hash_algorithm.clone(),
            server_list: self.server_list.clone(),
            v_bucket_map: rows.clone(),
            v_bucket_map_forward: None,
        })
    }
}
