//! The config ingest seam: how cluster snapshots reach the pool.
//!
//! The actual listener — HTTP long-poll, a comet stream, a static file in
//! tests — is implemented outside the core and only has to speak this
//! interface.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tidepool_cluster::{ClusterConfig, PortType};

use crate::error::ClientError;

/// One delivery on the snapshot stream. `None` empties the pool.
pub type ConfigUpdate = Option<ClusterConfig>;

/// A streaming configuration listener.
#[async_trait]
pub trait ConfigSource: Send + 'static {
    /// Starts listening and returns the snapshot stream. Called once.
    async fn start(&mut self) -> Result<mpsc::Receiver<ConfigUpdate>, ClientError>;

    /// Stops the listener. Called once when the pool shuts down.
    fn stop(&mut self);
}

/// Settings for one pool instance.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Base URIs of the configuration endpoints. Must not be empty.
    pub pool_urls: Vec<String>,
    /// Bucket to join. `None` or `"default"` selects the open default
    /// bucket.
    pub bucket: Option<String>,
    /// Explicit bucket password. See [`crate::bucket_credentials`] for the
    /// fallback order.
    pub bucket_password: Option<String>,
    /// Password from the configuration file, if any.
    pub configured_password: Option<String>,
    /// Which classic port to dial.
    pub port_type: PortType,
    /// Socket connect budget, handed to the conduit factory.
    pub connection_timeout: Duration,
    /// Quiet period between resurrection probe passes.
    pub dead_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_urls: Vec::new(),
            bucket: None,
            bucket_password: None,
            configured_password: None,
            port_type: PortType::Direct,
            connection_timeout: Duration::from_secs(10),
            dead_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolSettings {
    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.pool_urls.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "At least 1 pool url must be specified.".to_owned(),
            ));
        }
        Ok(())
    }
}
