//! Error types for topology handling.

use thiserror::Error;

/// Errors raised while interpreting a cluster configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Malformed snapshot: a bad endpoint, an inconsistent vbucket map, or
    /// an unsupported hash algorithm.
    #[error("invalid cluster configuration: {0}")]
    InvalidConfiguration(String),
}
