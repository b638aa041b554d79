//! Locator traits shared by the ring and vbucket implementations.

/// A node as a locator sees it: a stable label for placement and a runtime
/// liveness flag.
///
/// Placement must be a pure function of the label; liveness may change
/// between lookups without invalidating the locator.
pub trait RingMember: Clone + Send + Sync {
    /// Printable endpoint label, conventionally `host:port`.
    fn label(&self) -> String;

    /// Current liveness. Dead members stay placed; lookups skip them.
    fn is_alive(&self) -> bool;
}

/// Maps request keys to nodes.
pub trait NodeLocator<N: RingMember>: Send + Sync {
    /// The node that should serve `key`, or `None` when no routable node
    /// remains.
    fn locate(&self, key: &[u8]) -> Option<N>;

    /// Nodes currently eligible for routing.
    fn working_nodes(&self) -> Vec<N>;
}

/// Backing capability for a ring member that is shared via `Arc` rather than
/// cloned directly (its own fields aren't `Clone`).
pub trait RingNode: Send + Sync {
    /// Printable endpoint label, conventionally `host:port`.
    fn label(&self) -> String;

    /// Current liveness. Dead members stay placed; lookups skip them.
    fn is_alive(&self) -> bool;
}

impl<T: RingNode> RingMember for std::sync::Arc<T> {
    fn label(&self) -> String {
        RingNode::label(self.as_ref())
    }

    fn is_alive(&self) -> bool {
        RingNode::is_alive(self.as_ref())
    }
}

/// The locator of the empty sentinel state: routes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLocator;

impl<N: RingMember> NodeLocator<N> for EmptyLocator {
    fn locate(&self, _key: &[u8]) -> Option<N> {
        None
    }

    fn working_nodes(&self) -> Vec<N> {
        Vec::new()
    }
}
