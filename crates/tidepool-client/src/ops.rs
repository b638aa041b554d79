//! Operation routing factories.
//!
//! The wire-protocol encoders live outside the core. A factory's job is to
//! pair a key with the node that must serve it and, on the vbucket path,
//! stamp the bucket index that has to travel with the request.

use std::sync::Arc;

use tidepool_cluster::{KetamaLocator, NodeLocator, VBucketLocator};

use crate::error::ClientError;
use crate::node::NodeRef;

/// A request routed to a node.
///
/// `vbucket` is set on partitioned deployments; the protocol layer copies
/// it into the request header so the server can detect stale routing.
#[derive(Debug, Clone)]
pub struct RoutedOperation {
    pub node: NodeRef,
    pub vbucket: Option<u16>,
}

/// Routes keys for the operation layer. Always built together with the
/// locator of the same routing state, so the two never disagree.
pub trait OperationFactory: Send + Sync {
    /// Routes a key to the node that should serve it.
    fn route(&self, key: &[u8]) -> Result<RoutedOperation, ClientError>;

    /// Replica targets to retry against when the master cannot serve.
    /// Empty on deployments without replicas.
    fn replicas(&self, key: &[u8]) -> Vec<RoutedOperation> {
        let _ = key;
        Vec::new()
    }
}

/// Classic deployments: plain operations, no partition stamp.
pub struct BasicOperationFactory {
    locator: Arc<KetamaLocator<NodeRef>>,
}

impl BasicOperationFactory {
    pub fn new(locator: Arc<KetamaLocator<NodeRef>>) -> Self {
        Self { locator }
    }
}

impl OperationFactory for BasicOperationFactory {
    fn route(&self, key: &[u8]) -> Result<RoutedOperation, ClientError> {
        let node = self.locator.locate(key).ok_or(ClientError::NoRoute)?;
        Ok(RoutedOperation {
            node,
            vbucket: None,
        })
    }
}

/// Partitioned deployments: every request carries its bucket index.
pub struct VBucketOperationFactory {
    locator: Arc<VBucketLocator<NodeRef>>,
}

impl VBucketOperationFactory {
    pub fn new(locator: Arc<VBucketLocator<NodeRef>>) -> Self {
        Self { locator }
    }
}

impl OperationFactory for VBucketOperationFactory {
    fn route(&self, key: &[u8]) -> Result<RoutedOperation, ClientError> {
        let vbucket = self.locator.vbucket_of(key);
        let node = self.locator.locate(key).ok_or(ClientError::NoRoute)?;
        Ok(RoutedOperation {
            node,
            vbucket: Some(vbucket),
        })
    }

    fn replicas(&self, key: &[u8]) -> Vec<RoutedOperation> {
        let vbucket = self.locator.vbucket_of(key);
        self.locator
            .replicas_of(key)
            .into_iter()
            .map(|node| RoutedOperation {
                node,
                vbucket: Some(vbucket),
            })
            .collect()
    }
}

/// Factory of the empty sentinel state.
pub(crate) struct EmptyOperationFactory;

impl OperationFactory for EmptyOperationFactory {
    fn route(&self, _key: &[u8]) -> Result<RoutedOperation, ClientError> {
        Err(ClientError::NoRoute)
    }
}
