//! The dynamic pool manager.
//!
//! Owns the routing state, reacts to configuration snapshots, and runs the
//! resurrection timer that re-probes dead nodes.
//!
//! # Concurrency model
//!
//! All mutation — applying a snapshot, probing dead nodes, shutting down —
//! happens on a single driver task, so mutations are serialized without a
//! lock protocol. Mutation always produces a fresh [`RoutingState`] and
//! publishes it through a read-write lock that readers only ever hold long
//! enough to clone an `Arc`. A reader that grabbed the previous state keeps
//! a consistent view until it drops the `Arc`; its node handles stay valid
//! because retirement only closes sockets, never frees the handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use tidepool_cluster::{
    validate_server_map, EmptyLocator, KetamaLocator, NodeEndpoint, NodeLocator, VBucketLocator,
    VBucketServerMap,
};

use crate::auth::bucket_credentials;
use crate::error::ClientError;
use crate::node::{ConduitFactory, FailureNotice, NodeHandle, NodeRef};
use crate::ops::{
    BasicOperationFactory, EmptyOperationFactory, OperationFactory, VBucketOperationFactory,
};
use crate::source::{ConfigSource, ConfigUpdate, PoolSettings};

/// An immutable routing snapshot.
///
/// Replaced wholesale on every configuration change and never mutated after
/// publication. Node liveness lives inside the handles, not here, so a
/// snapshot stays current across failures and resurrections.
pub struct RoutingState {
    epoch: u64,
    /// Server-list order is preserved on the vbucket path so map indices
    /// stay valid.
    nodes: Vec<NodeRef>,
    locator: Arc<dyn NodeLocator<NodeRef>>,
    /// Locator over the pending map during a rebalance window.
    forward_locator: Option<Arc<VBucketLocator<NodeRef>>>,
    op_factory: Arc<dyn OperationFactory>,
}

impl RoutingState {
    fn empty(epoch: u64) -> Arc<Self> {
        Arc::new(Self {
            epoch,
            nodes: Vec::new(),
            locator: Arc::new(EmptyLocator),
            forward_locator: None,
            op_factory: Arc::new(EmptyOperationFactory),
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn locator(&self) -> &Arc<dyn NodeLocator<NodeRef>> {
        &self.locator
    }

    pub fn forward_locator(&self) -> Option<&Arc<VBucketLocator<NodeRef>>> {
        self.forward_locator.as_ref()
    }

    pub fn operation_factory(&self) -> &Arc<dyn OperationFactory> {
        &self.op_factory
    }
}

struct PoolShared {
    state: RwLock<Arc<RoutingState>>,
}

/// The pool manager handle.
///
/// Cheap to share through an `Arc`; the hot-path methods never block on the
/// driver.
impl fmt::Debug for ClusterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterPool").finish_non_exhaustive()
    }
}

pub struct ClusterPool {
    shared: Arc<PoolShared>,
    driver: Option<tokio::task::JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ClusterPool {
    /// Starts the pool: validates settings, starts the config source, and
    /// blocks until the first snapshot has been turned into a routing
    /// state. Configuration errors here are never swallowed.
    pub async fn start<S: ConfigSource>(
        settings: PoolSettings,
        conduits: Arc<dyn ConduitFactory>,
        mut source: S,
    ) -> Result<Self, ClientError> {
        settings.validate()?;

        let mut updates = match source.start().await {
            Ok(updates) => updates,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };
        let first = match updates.recv().await {
            Some(update) => update,
            None => {
                source.stop();
                return Err(ClientError::ConfigStreamClosed);
            }
        };

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let mut builder = StateBuilder {
            settings,
            conduits,
            failure_tx,
            epoch: 0,
        };
        let state = match builder.build(first) {
            Ok(state) => state,
            Err(e) => {
                source.stop();
                return Err(e);
            }
        };
        info!(
            "pool started: epoch {} with {} nodes",
            state.epoch(),
            state.nodes().len()
        );

        let shared = Arc::new(PoolShared {
            state: RwLock::new(state),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            shared: shared.clone(),
            builder,
            updates,
            updates_open: true,
            failure_rx,
            shutdown: shutdown_rx,
            source,
            rez_deadline: None,
        };
        Ok(Self {
            shared,
            driver: Some(tokio::spawn(driver.run())),
            shutdown: Some(shutdown_tx),
        })
    }

    /// The current routing snapshot: a read lock held for one `Arc` clone.
    pub fn state(&self) -> Arc<RoutingState> {
        self.shared.state.read().clone()
    }

    /// Maps a key to the node that should serve it.
    pub fn locate(&self, key: &[u8]) -> Result<NodeRef, ClientError> {
        self.state().locator.locate(key).ok_or(ClientError::NoRoute)
    }

    /// Nodes currently eligible for routing.
    pub fn working_nodes(&self) -> Vec<NodeRef> {
        self.state().locator.working_nodes()
    }

    /// The operation factory paired with the current locator.
    pub fn operation_factory(&self) -> Arc<dyn OperationFactory> {
        self.state().op_factory.clone()
    }

    /// Graceful shutdown: retires every node, publishes the empty state,
    /// and stops the config source.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for ClusterPool {
    fn drop(&mut self) {
        // best-effort when shutdown() was not awaited
        if let Some(driver) = self.driver.take() {
            driver.abort();
            let state = self.shared.state.read().clone();
            for node in &state.nodes {
                node.dispose();
            }
        }
    }
}

/// Builds routing states from snapshots. Every state gets fresh node
/// handles — two states never share one, even for a surviving endpoint, so
/// a half-retired socket pool can never leak into the new state.
struct StateBuilder {
    settings: PoolSettings,
    conduits: Arc<dyn ConduitFactory>,
    failure_tx: mpsc::UnboundedSender<FailureNotice>,
    epoch: u64,
}

impl StateBuilder {
    fn build(&mut self, update: ConfigUpdate) -> Result<Arc<RoutingState>, ClientError> {
        self.epoch += 1;
        let epoch = self.epoch;
        let Some(config) = update else {
            return Ok(RoutingState::empty(epoch));
        };

        match &config.v_bucket_server_map {
            Some(map) => {
                // reject a bad map (live or forward) before any conduit is
                // opened; a malformed snapshot must not cost resources
                validate_server_map(map)?;
                let endpoints = map.endpoints()?;
                let nodes = self.open_nodes(&endpoints, epoch);
                let (locator, forward_locator) = match Self::vbucket_locators(&nodes, map) {
                    Ok(locators) => locators,
                    Err(e) => {
                        // no state will ever own these handles; close
                        // their conduits before surfacing the error
                        retire_nodes(&nodes);
                        return Err(e);
                    }
                };
                let op_factory = Arc::new(VBucketOperationFactory::new(locator.clone()));
                Ok(Arc::new(RoutingState {
                    epoch,
                    nodes,
                    locator,
                    forward_locator,
                    op_factory,
                }))
            }
            None => {
                let endpoints = config.healthy_endpoints(self.settings.port_type);
                let nodes = self.open_nodes(&endpoints, epoch);
                let locator = Arc::new(KetamaLocator::new(nodes.clone()));
                let op_factory = Arc::new(BasicOperationFactory::new(locator.clone()));
                Ok(Arc::new(RoutingState {
                    epoch,
                    nodes,
                    locator,
                    forward_locator: None,
                    op_factory,
                }))
            }
        }
    }

    fn vbucket_locators(
        nodes: &[NodeRef],
        map: &VBucketServerMap,
    ) -> Result<
        (
            Arc<VBucketLocator<NodeRef>>,
            Option<Arc<VBucketLocator<NodeRef>>>,
        ),
        ClientError,
    > {
        let locator = Arc::new(VBucketLocator::new(nodes.to_vec(), map)?);
        let forward_locator = match map.forward() {
            Some(forward) => Some(Arc::new(VBucketLocator::new(nodes.to_vec(), &forward)?)),
            None => None,
        };
        Ok((locator, forward_locator))
    }

    fn open_nodes(&self, endpoints: &[NodeEndpoint], epoch: u64) -> Vec<NodeRef> {
        let auth = bucket_credentials(
            self.settings.bucket.as_deref(),
            self.settings.bucket_password.as_deref(),
            self.settings.configured_password.as_deref(),
        );
        endpoints
            .iter()
            .map(|endpoint| {
                let conduit = self.conduits.open(
                    endpoint,
                    auth.as_ref(),
                    self.settings.connection_timeout,
                );
                Arc::new(NodeHandle::new(
                    endpoint.clone(),
                    conduit,
                    self.failure_tx.clone(),
                    epoch,
                ))
            })
            .collect()
    }
}

/// The single mutation task.
struct Driver<S> {
    shared: Arc<PoolShared>,
    builder: StateBuilder,
    updates: mpsc::Receiver<ConfigUpdate>,
    updates_open: bool,
    failure_rx: mpsc::UnboundedReceiver<FailureNotice>,
    shutdown: oneshot::Receiver<()>,
    source: S,
    /// `Some` while the resurrection timer is armed.
    rez_deadline: Option<Instant>,
}

impl<S: ConfigSource> Driver<S> {
    async fn run(mut self) {
        loop {
            // placeholder deadline; the guard keeps it from ever firing
            let deadline = self
                .rez_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                _ = &mut self.shutdown => {
                    self.retire_into_empty();
                    self.source.stop();
                    info!("pool shut down");
                    return;
                }
                update = self.updates.recv(), if self.updates_open => match update {
                    Some(update) => self.apply_update(update),
                    None => {
                        // listener gone; keep serving the last state
                        debug!("configuration stream ended");
                        self.updates_open = false;
                    }
                },
                Some(notice) = self.failure_rx.recv() => self.on_failure(notice),
                _ = sleep_until(deadline), if self.rez_deadline.is_some() => {
                    self.probe_dead_nodes().await;
                }
            }
        }
    }

    fn apply_update(&mut self, update: ConfigUpdate) {
        // the timer is suspended for the duration of the swap; the nodes it
        // would have probed are being retired anyway
        self.rez_deadline = None;

        match self.builder.build(update) {
            Ok(new_state) => {
                info!(
                    "routing state swapped: epoch {} with {} nodes",
                    new_state.epoch(),
                    new_state.nodes().len()
                );
                let old = {
                    let mut guard = self.shared.state.write();
                    std::mem::replace(&mut *guard, new_state)
                };
                retire(&old);
            }
            Err(e) => {
                // a malformed snapshot after start must not take the pool
                // down; keep serving the previous state
                warn!("ignoring malformed cluster snapshot: {e}");
                let state = self.shared.state.read().clone();
                if state.nodes().iter().any(|n| !n.is_alive()) {
                    self.arm_timer();
                }
            }
        }
    }

    fn on_failure(&mut self, notice: FailureNotice) {
        let current = self.shared.state.read().clone();
        if notice.epoch != current.epoch() {
            // a handle of a retired state; drop silently
            return;
        }
        if self.rez_deadline.is_none() {
            self.arm_timer();
        }
    }

    fn arm_timer(&mut self) {
        let dead_timeout = self.builder.settings.dead_timeout;
        debug!("resurrection timer armed for {dead_timeout:?}");
        self.rez_deadline = Some(Instant::now() + dead_timeout);
    }

    /// One resurrection pass: ping every dead node of the current state,
    /// sequentially. Rearms only while someone is still dead, so probe
    /// traffic is bounded to one pass per `dead_timeout` no matter how many
    /// nodes died in the meantime.
    async fn probe_dead_nodes(&mut self) {
        self.rez_deadline = None;
        let state = self.shared.state.read().clone();

        let mut still_dead = 0usize;
        for node in state.nodes() {
            if node.is_alive() {
                continue;
            }
            if node.ping().await {
                info!("node {} is back in rotation", node.endpoint());
            } else {
                still_dead += 1;
            }
        }

        if still_dead > 0 {
            debug!("{still_dead} nodes still dead after probe pass");
            self.arm_timer();
        }
    }

    fn retire_into_empty(&mut self) {
        self.builder.epoch += 1;
        let empty = RoutingState::empty(self.builder.epoch);
        let old = {
            let mut guard = self.shared.state.write();
            std::mem::replace(&mut *guard, empty)
        };
        retire(&old);
    }
}

/// Retires every node of a replaced state. Disposal is deliberately
/// infallible so cleanup can never mask a successful swap.
fn retire(state: &RoutingState) {
    retire_nodes(state.nodes());
}

fn retire_nodes(nodes: &[NodeRef]) {
    for node in nodes {
        node.dispose();
    }
}
