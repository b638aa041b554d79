//! Error types for the pool manager.

use thiserror::Error;
use tidepool_cluster::{NodeEndpoint, TopologyError};
use tidepool_codec::CodecError;

/// Errors surfaced through the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Startup-time misconfiguration: an empty pool URL set, a source that
    /// cannot start, or a first snapshot the locator rejects.
    #[error("{0}")]
    InvalidConfiguration(String),

    /// Topology errors pass through unchanged during startup.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// No alive node can serve the key: the whole membership is dead, or
    /// the key's vbucket master is unassigned.
    #[error("no route: no alive node can serve the key")]
    NoRoute,

    /// The connection layer classified the node as down.
    #[error("node {0} is unreachable")]
    NodeUnreachable(NodeEndpoint),

    /// The key violates the protocol's key rules.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Envelope codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The configuration stream closed before delivering a snapshot.
    #[error("configuration stream closed before the first snapshot")]
    ConfigStreamClosed,
}
