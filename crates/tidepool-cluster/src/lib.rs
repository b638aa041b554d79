//! tidepool-cluster: topology model and node locators.
//!
//! This crate answers one question: given a request key and the cluster
//! configuration currently in force, which node should serve the request?
//!
//! Two locator families exist:
//!
//! - **Ketama**: a consistent-hash ring with 160 virtual points per node,
//!   for classic deployments where the client owns key placement.
//! - **VBucket**: key → bucket → master routing driven by a server-supplied
//!   partition map, for deployments where the cluster owns placement.
//!
//! Locators are built over anything implementing [`RingMember`], so the
//! pool layer can route over its own node handles. Membership is fixed at
//! construction; node liveness is a runtime overlay that lookups consult.

mod config;
mod error;
mod ketama;
mod locator;
mod vbucket;

pub use config::{
    ClusterConfig, NodeConfig, NodeEndpoint, NodePorts, NodeStatus, PortType, VBucketServerMap,
};
pub use error::TopologyError;
pub use ketama::KetamaLocator;
pub use locator::{EmptyLocator, NodeLocator, RingMember, RingNode};
pub use vbucket::{validate_server_map, BucketHasher, VBucket, VBucketLocator};
