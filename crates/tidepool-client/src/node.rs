//! One cache node as the pool sees it.
//!
//! A handle pairs an endpoint with its connection-layer conduit and tracks
//! liveness. Handles are owned by exactly one routing state; replacing the
//! state retires its handles and builds fresh ones, even for endpoints that
//! survive the change.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use tidepool_cluster::{NodeEndpoint, RingNode};

use crate::auth::PlainCredentials;

/// The externally supplied connection layer for one node.
///
/// Implementations own the pooled sockets. The pool core only ever probes
/// liveness and, on retirement, asks for the sockets to be closed.
#[async_trait]
pub trait Conduit: Send + Sync {
    /// Low-cost liveness round-trip, bounded by the socket layer's own
    /// timeouts.
    async fn ping(&self) -> bool;

    /// Closes every pooled socket. Must tolerate being called on a conduit
    /// with operations still in flight.
    fn shutdown(&self);
}

/// Builds conduits for the nodes of each new routing state.
pub trait ConduitFactory: Send + Sync + 'static {
    fn open(
        &self,
        endpoint: &NodeEndpoint,
        auth: Option<&PlainCredentials>,
        connect_timeout: std::time::Duration,
    ) -> Box<dyn Conduit>;
}

/// Failure notice delivered to the pool driver.
///
/// Carries the epoch of the routing state the node belongs to, so notices
/// from handles of an already retired state can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureNotice {
    pub epoch: u64,
}

struct FailureSink {
    tx: mpsc::UnboundedSender<FailureNotice>,
    epoch: u64,
}

/// A shared node handle.
pub type NodeRef = Arc<NodeHandle>;

/// The pool's view of one cache node.
pub struct NodeHandle {
    endpoint: NodeEndpoint,
    conduit: Box<dyn Conduit>,
    alive: AtomicBool,
    disposed: AtomicBool,
    last_failure: Mutex<Option<Instant>>,
    /// Set at construction, cleared at dispose. The driver is the only
    /// subscriber, so a slot replaces any event machinery.
    sink: Mutex<Option<FailureSink>>,
}

impl NodeHandle {
    pub(crate) fn new(
        endpoint: NodeEndpoint,
        conduit: Box<dyn Conduit>,
        tx: mpsc::UnboundedSender<FailureNotice>,
        epoch: u64,
    ) -> Self {
        Self {
            endpoint,
            conduit,
            alive: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            last_failure: Mutex::new(None),
            sink: Mutex::new(Some(FailureSink { tx, epoch })),
        }
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// When the node last tripped dead detection, for diagnostics.
    pub fn last_failure(&self) -> Option<Instant> {
        *self.last_failure.lock()
    }

    /// Called by the connection layer when an operation failed in a way it
    /// classifies as "node down" (timeout, refused, abrupt close).
    pub fn report_failure(&self) {
        self.alive.store(false, Ordering::Release);
        *self.last_failure.lock() = Some(Instant::now());
        debug!("node {} marked dead", self.endpoint);
        if let Some(sink) = self.sink.lock().as_ref() {
            // the driver may already be gone during shutdown
            let _ = sink.tx.send(FailureNotice { epoch: sink.epoch });
        }
    }

    /// Probes the node. Success puts it back into rotation immediately —
    /// the locators consult liveness per lookup, so no rebuild happens.
    pub async fn ping(&self) -> bool {
        let ok = self.conduit.ping().await;
        if ok {
            self.alive.store(true, Ordering::Release);
        }
        ok
    }

    /// Retires the handle: detaches the failure sink and closes the pooled
    /// sockets. Idempotent; later calls are no-ops.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sink.lock().take();
        self.conduit.shutdown();
        debug!("node {} retired", self.endpoint);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("endpoint", &self.endpoint)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl RingNode for NodeHandle {
    fn label(&self) -> String {
        self.endpoint.to_string()
    }

    fn is_alive(&self) -> bool {
        NodeHandle::is_alive(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct StubConduit {
        ping_ok: AtomicBool,
        pings: AtomicUsize,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Conduit for StubConduit {
        async fn ping(&self) -> bool {
            self.pings.fetch_add(1, Ordering::Relaxed);
            self.ping_ok.load(Ordering::Relaxed)
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle(
        ping_ok: bool,
        shutdowns: Arc<AtomicUsize>,
        tx: mpsc::UnboundedSender<FailureNotice>,
    ) -> NodeHandle {
        NodeHandle::new(
            NodeEndpoint::new("cache1", 11211),
            Box::new(StubConduit {
                ping_ok: AtomicBool::new(ping_ok),
                pings: AtomicUsize::new(0),
                shutdowns,
            }),
            tx,
            7,
        )
    }

    #[tokio::test]
    async fn failure_flips_liveness_and_notifies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let node = handle(true, Arc::new(AtomicUsize::new(0)), tx);

        assert!(node.is_alive());
        assert!(node.last_failure().is_none());

        node.report_failure();
        assert!(!node.is_alive());
        assert!(node.last_failure().is_some());
        assert_eq!(rx.recv().await, Some(FailureNotice { epoch: 7 }));
    }

    #[tokio::test]
    async fn successful_ping_resurrects() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = handle(true, Arc::new(AtomicUsize::new(0)), tx);

        node.report_failure();
        assert!(!node.is_alive());
        assert!(node.ping().await);
        assert!(node.is_alive());
    }

    #[tokio::test]
    async fn failed_ping_leaves_the_node_dead() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = handle(false, Arc::new(AtomicUsize::new(0)), tx);

        node.report_failure();
        assert!(!node.ping().await);
        assert!(!node.is_alive());
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_detaches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let node = handle(true, shutdowns.clone(), tx);

        node.dispose();
        node.dispose();
        assert_eq!(shutdowns.load(Ordering::Relaxed), 1);

        // a detached handle no longer notifies
        node.report_failure();
        assert!(rx.try_recv().is_err());
    }
}
