use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::core::NodeId;

/// Mutable coordination state of a single controller
///
/// Only the owning node's ring engine and phase machine touch this. The
/// token flag in particular has exactly two writers: receipt of a `TOKEN`
/// and a successful outbound handover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    /// Whether this node currently holds the token
    pub holds_token: bool,
    /// Node the token must be returned to after use
    pub return_address: Option<NodeId>,
    /// An emergency vehicle is approaching this node
    pub emergency_active: bool,
    /// Kind of the approaching emergency vehicle
    pub emergency_kind: String,
    /// Node that asked the ring to yield to it
    pub yield_request: Option<NodeId>,
}

impl NodeState {
    /// State of the node that starts out holding the token
    pub fn bootstrap() -> Self {
        NodeState {
            holds_token: true,
            ..Default::default()
        }
    }
}

/// Handle to a node's state shared between its receive and control tasks
///
/// Every read-modify-write happens under one lock so neither task can
/// observe a half-applied update.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<NodeState>>,
}

impl SharedState {
    pub fn new(state: NodeState) -> Self {
        SharedState {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Locks the state for a single atomic update
    pub async fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.inner.lock().await
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> NodeState {
        self.inner.lock().await.clone()
    }

    pub async fn holds_token(&self) -> bool {
        self.inner.lock().await.holds_token
    }

    pub async fn yield_request(&self) -> Option<NodeId> {
        self.inner.lock().await.yield_request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_state() {
        let state = NodeState::bootstrap();
        assert!(state.holds_token);
        assert!(state.return_address.is_none());
        assert!(state.yield_request.is_none());
        assert!(!state.emergency_active);
        assert!(!NodeState::default().holds_token);
    }

    #[tokio::test]
    async fn test_shared_state_updates_are_visible_to_clones() {
        let shared = SharedState::new(NodeState::default());
        let other = shared.clone();

        {
            let mut state = shared.lock().await;
            state.yield_request = Some(NodeId(3));
            state.emergency_active = true;
        }

        assert_eq!(other.yield_request().await, Some(NodeId(3)));
        assert!(other.snapshot().await.emergency_active);
        assert!(!other.holds_token().await);
    }
}
