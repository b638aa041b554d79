//! tidepool-client: the dynamic pool manager and request router.
//!
//! This crate is the client-side core of a distributed cache deployment:
//! it consumes cluster configuration snapshots from a streaming source,
//! keeps one connection-pool conduit per node, routes request keys to
//! nodes through the locators in `tidepool-cluster`, and quietly probes
//! dead nodes back into rotation.
//!
//! # Architecture
//!
//! ```text
//! config source ──► driver task ──► RoutingState {nodes, locator, ops}
//!                      ▲   │              │ published via RwLock<Arc<_>>
//!      failure notices ┘   └ resurrection timer
//! ```
//!
//! Readers grab the current [`RoutingState`] snapshot and never contend
//! with the driver. The socket layer, wire protocol, SASL handshake, and
//! the concrete HTTP config listener all live outside this crate, behind
//! the [`Conduit`], [`OperationFactory`], and [`ConfigSource`] seams.

mod auth;
mod error;
mod keys;
mod node;
mod ops;
mod pool;
mod source;

pub use auth::{bucket_credentials, PlainCredentials};
pub use error::ClientError;
pub use keys::{HashedKeys, IdentityKeys, KeyTransformer, MAX_KEY_LEN};
pub use node::{Conduit, ConduitFactory, FailureNotice, NodeHandle, NodeRef};
pub use ops::{
    BasicOperationFactory, OperationFactory, RoutedOperation, VBucketOperationFactory,
};
pub use pool::{ClusterPool, RoutingState};
pub use source::{ConfigSource, ConfigUpdate, PoolSettings};
