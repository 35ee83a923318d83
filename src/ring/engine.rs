use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{info, warn};

use crate::core::{Error, NodeId, Result, RingTopology};
use crate::network::Transport;
use crate::protocol::{encode_message, Message, SharedState};

/// How a message was applied to the node state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Conflicting or meaningless message, dropped without touching state
    Ignored,
}

/// Why a handover goes where it goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverKind {
    /// To the normal successor
    Normal,
    /// Out of order, to a node that requested preemption
    Yield,
    /// Back to the node recorded in `return_address`
    Return,
}

/// Destination of the next token handover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoverPlan {
    pub target: NodeId,
    pub return_to: Option<NodeId>,
    pub kind: HandoverKind,
}

/// Per-target outcome of a fire-and-forget broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<NodeId>,
    pub failed: Vec<NodeId>,
}

/// Token ring protocol engine of a single node
///
/// Applies inbound messages to the node state and performs outbound token
/// handovers. The state lock is never held across a send.
pub struct RingEngine<T: Transport> {
    id: NodeId,
    topology: Arc<RingTopology>,
    state: SharedState,
    transport: T,
}

impl<T: Transport> Clone for RingEngine<T> {
    fn clone(&self) -> Self {
        RingEngine {
            id: self.id,
            topology: Arc::clone(&self.topology),
            state: self.state.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> RingEngine<T> {
    /// Creates an engine for node `id` of `topology`
    pub fn new(
        id: NodeId,
        topology: Arc<RingTopology>,
        state: SharedState,
        transport: T,
    ) -> Result<Self> {
        if !topology.contains(id) {
            return Err(Error::config(format!("Node {} is not part of the ring", id)));
        }
        Ok(RingEngine {
            id,
            topology,
            state,
            transport,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn topology(&self) -> &RingTopology {
        &self.topology
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Applies one inbound message
    pub async fn handle_message(&self, message: Message) -> Result<Disposition> {
        match message {
            Message::Token { sender, return_to } => Ok(self.on_token(sender, return_to).await),
            Message::PriorityRequest { vehicle_kind } => {
                self.on_priority_request(vehicle_kind).await
            }
            Message::PreemptRequest { sender } => Ok(self.on_preempt_request(sender).await),
            Message::PreemptClear { sender } => self.on_preempt_clear(sender).await,
        }
    }

    async fn on_token(&self, sender: NodeId, return_to: Option<NodeId>) -> Disposition {
        if sender == self.id || !self.topology.contains(sender) {
            warn!(node = %self.id, %sender, "Ignoring token from unexpected sender");
            return Disposition::Ignored;
        }

        let return_to = match return_to {
            Some(target) if target == self.id || !self.topology.contains(target) => {
                warn!(
                    node = %self.id,
                    %sender,
                    %target,
                    "Ignoring invalid return address on token"
                );
                None
            }
            other => other,
        };

        let mut state = self.state.lock().await;
        if state.holds_token {
            // Duplicate or second token; keeping ours preserves the single holder
            warn!(node = %self.id, %sender, "Received token while already holding one");
            return Disposition::Ignored;
        }
        state.holds_token = true;
        state.return_address = return_to;
        state.yield_request = None;
        drop(state);

        info!(node = %self.id, %sender, return_to = ?return_to, "Token received");
        Disposition::Applied
    }

    async fn on_priority_request(&self, vehicle_kind: String) -> Result<Disposition> {
        {
            let mut state = self.state.lock().await;
            state.emergency_active = true;
            state.emergency_kind = vehicle_kind.clone();
        }
        info!(node = %self.id, kind = %vehicle_kind, "Emergency vehicle approaching");

        let report = self
            .broadcast(&Message::PreemptRequest { sender: self.id })
            .await?;
        info!(
            node = %self.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Preemption requested"
        );
        Ok(Disposition::Applied)
    }

    async fn on_preempt_request(&self, sender: NodeId) -> Disposition {
        if sender == self.id {
            return Disposition::Ignored;
        }
        if !self.topology.contains(sender) {
            warn!(node = %self.id, %sender, "Ignoring preemption request from unknown node");
            return Disposition::Ignored;
        }
        self.state.lock().await.yield_request = Some(sender);
        info!(node = %self.id, requester = %sender, "Yield requested");
        Disposition::Applied
    }

    async fn on_preempt_clear(&self, sender: NodeId) -> Result<Disposition> {
        let emergency_ended = {
            let mut state = self.state.lock().await;
            state.yield_request = None;
            let ended = sender == self.id && state.emergency_active;
            if ended {
                state.emergency_active = false;
                state.emergency_kind.clear();
            }
            ended
        };

        if emergency_ended {
            info!(node = %self.id, "Emergency cleared, releasing preemption");
            self.broadcast(&Message::PreemptClear { sender: self.id }).await?;
        }
        Ok(Disposition::Applied)
    }

    /// Sends `message` to every other node; failures are logged per target
    pub async fn broadcast(&self, message: &Message) -> Result<BroadcastReport> {
        let payload = encode_message(message)?;
        let sends = self
            .topology
            .peers(self.id)
            .map(|(peer, addr)| self.send_to(peer, addr, payload.clone()));

        let mut report = BroadcastReport::default();
        for (peer, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered.push(peer),
                Err(e) => {
                    warn!(
                        node = %self.id,
                        %peer,
                        kind = message.kind(),
                        error = %e,
                        "Broadcast send failed"
                    );
                    report.failed.push(peer);
                }
            }
        }
        Ok(report)
    }

    async fn send_to(
        &self,
        peer: NodeId,
        addr: SocketAddr,
        payload: Bytes,
    ) -> (NodeId, Result<()>) {
        (peer, self.transport.send(addr, payload).await)
    }

    /// Decides where the token goes next
    ///
    /// A recorded return address wins. Otherwise a pending yield request
    /// sends the token to the requester, carrying this node's successor as
    /// the return address so the cycle resumes where it left off.
    pub async fn plan_handover(&self) -> Result<HandoverPlan> {
        let successor = self
            .topology
            .successor(self.id)
            .ok_or_else(|| Error::invalid_state(format!("Node {} has no successor", self.id)))?;

        let state = self.state.lock().await;
        if !state.holds_token {
            return Err(Error::invalid_state("Cannot hand over a token this node does not hold"));
        }

        let plan = match (state.return_address, state.yield_request) {
            (Some(target), _) => HandoverPlan {
                target,
                return_to: None,
                kind: HandoverKind::Return,
            },
            (None, Some(requester)) if requester != successor => HandoverPlan {
                target: requester,
                return_to: Some(successor),
                kind: HandoverKind::Yield,
            },
            _ => HandoverPlan {
                target: successor,
                return_to: None,
                kind: HandoverKind::Normal,
            },
        };
        Ok(plan)
    }

    /// Sends the token according to `plan`
    ///
    /// Token state is only cleared once the send has succeeded; on failure
    /// this node keeps the token and the caller decides when to retry.
    pub async fn execute_handover(&self, plan: &HandoverPlan) -> Result<()> {
        let addr = self.topology.address(plan.target).ok_or_else(|| {
            Error::invalid_state(format!("Handover target {} is not part of the ring", plan.target))
        })?;
        let payload = encode_message(&Message::Token {
            sender: self.id,
            return_to: plan.return_to,
        })?;

        if let Err(e) = self.transport.send(addr, payload).await {
            warn!(
                node = %self.id,
                target = %plan.target,
                error = %e,
                "Token handover failed, keeping token"
            );
            return Err(Error::handover(format!(
                "Could not pass token to node {}: {}",
                plan.target, e
            )));
        }

        let mut state = self.state.lock().await;
        state.holds_token = false;
        state.yield_request = None;
        if plan.kind == HandoverKind::Return {
            state.return_address = None;
        }
        drop(state);

        info!(node = %self.id, target = %plan.target, kind = ?plan.kind, "Token handed over");
        Ok(())
    }

    /// Plans and executes a handover in one call
    pub async fn handover(&self) -> Result<HandoverPlan> {
        let plan = self.plan_handover().await?;
        self.execute_handover(&plan).await?;
        Ok(plan)
    }

    /// Operator recovery for a lost token: makes this node the holder
    ///
    /// Must only be triggered on one node, after the ring has been confirmed
    /// tokenless. Returns false if this node already holds the token.
    pub async fn reseed_token(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.holds_token {
            return false;
        }
        state.holds_token = true;
        state.return_address = None;
        state.yield_request = None;
        drop(state);

        warn!(node = %self.id, "Token reseeded by operator");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryTransport;
    use crate::protocol::{decode_message, NodeState};

    fn addr(id: u32) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5000 + id as u16))
    }

    fn engine(id: u32, state: NodeState) -> (RingEngine<MemoryTransport>, MemoryTransport) {
        let nodes: Vec<_> = (1..=4).map(|n| (NodeId(n), addr(n))).collect();
        let topology = Arc::new(RingTopology::ordered(&nodes).unwrap());
        let transport = MemoryTransport::new();
        for n in 1..=4 {
            transport.register(addr(n));
        }
        let engine = RingEngine::new(
            NodeId(id),
            topology,
            SharedState::new(state),
            transport.clone(),
        )
        .unwrap();
        (engine, transport)
    }

    fn holding_with_yield(requester: u32) -> NodeState {
        NodeState {
            yield_request: Some(NodeId(requester)),
            ..NodeState::bootstrap()
        }
    }

    fn inbox(transport: &MemoryTransport, id: u32) -> Vec<Message> {
        transport
            .drain(addr(id))
            .iter()
            .map(|payload| decode_message(payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_token_receipt() {
        let state = NodeState {
            yield_request: Some(NodeId(4)),
            ..Default::default()
        };
        let (engine, _) = engine(2, state);

        let disposition = engine
            .handle_message(Message::Token {
                sender: NodeId(1),
                return_to: Some(NodeId(3)),
            })
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Applied);
        let state = engine.state().snapshot().await;
        assert!(state.holds_token);
        assert_eq!(state.return_address, Some(NodeId(3)));
        assert_eq!(state.yield_request, None);
    }

    #[tokio::test]
    async fn test_token_with_invalid_return_address() {
        for return_to in [NodeId(2), NodeId(9)] {
            let (engine, _) = engine(2, NodeState::default());

            let disposition = engine
                .handle_message(Message::Token {
                    sender: NodeId(1),
                    return_to: Some(return_to),
                })
                .await
                .unwrap();

            assert_eq!(disposition, Disposition::Applied);
            let state = engine.state().snapshot().await;
            assert!(state.holds_token);
            assert_eq!(state.return_address, None);
        }
    }

    #[tokio::test]
    async fn test_second_token_ignored() {
        let (engine, _) = engine(2, NodeState::bootstrap());
        let disposition = engine
            .handle_message(Message::Token {
                sender: NodeId(1),
                return_to: Some(NodeId(3)),
            })
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Ignored);
        assert_eq!(engine.state().snapshot().await, NodeState::bootstrap());
    }

    #[tokio::test]
    async fn test_token_from_unknown_sender_ignored() {
        let (engine, _) = engine(2, NodeState::default());
        let disposition = engine
            .handle_message(Message::Token {
                sender: NodeId(9),
                return_to: None,
            })
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ignored);
        assert!(!engine.state().holds_token().await);
    }

    #[tokio::test]
    async fn test_preempt_request_and_clear() {
        let (engine, _) = engine(1, NodeState::default());

        engine
            .handle_message(Message::PreemptRequest { sender: NodeId(2) })
            .await
            .unwrap();
        assert_eq!(engine.state().yield_request().await, Some(NodeId(2)));

        engine
            .handle_message(Message::PreemptClear { sender: NodeId(4) })
            .await
            .unwrap();
        assert_eq!(engine.state().yield_request().await, None);
    }

    #[tokio::test]
    async fn test_self_preempt_is_noop() {
        let (engine, _) = engine(1, NodeState::default());
        let disposition = engine
            .handle_message(Message::PreemptRequest { sender: NodeId(1) })
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ignored);
        assert_eq!(engine.state().snapshot().await, NodeState::default());
    }

    #[tokio::test]
    async fn test_preempt_from_unknown_node_ignored() {
        let (engine, _) = engine(1, NodeState::default());
        let disposition = engine
            .handle_message(Message::PreemptRequest { sender: NodeId(9) })
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ignored);
        assert_eq!(engine.state().yield_request().await, None);
    }

    #[tokio::test]
    async fn test_priority_request_broadcasts_despite_failures() {
        let (engine, transport) = engine(3, NodeState::default());
        transport.set_unreachable(addr(1), true);

        engine
            .handle_message(Message::PriorityRequest {
                vehicle_kind: "AMBULANCE".to_string(),
            })
            .await
            .unwrap();

        let state = engine.state().snapshot().await;
        assert!(state.emergency_active);
        assert_eq!(state.emergency_kind, "AMBULANCE");

        let request = Message::PreemptRequest { sender: NodeId(3) };
        for id in [2, 4] {
            assert_eq!(inbox(&transport, id), vec![request.clone()]);
        }
        assert!(inbox(&transport, 1).is_empty());
        assert!(inbox(&transport, 3).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_report() {
        let (engine, transport) = engine(3, NodeState::default());
        transport.set_unreachable(addr(1), true);

        let report = engine
            .broadcast(&Message::PreemptRequest { sender: NodeId(3) })
            .await
            .unwrap();

        assert_eq!(report.delivered, vec![NodeId(2), NodeId(4)]);
        assert_eq!(report.failed, vec![NodeId(1)]);
        assert_eq!(transport.pending(addr(3)), 0);
    }

    #[tokio::test]
    async fn test_local_clear_ends_emergency_and_rebroadcasts() {
        let (engine, transport) = engine(3, NodeState::default());
        engine
            .handle_message(Message::PriorityRequest {
                vehicle_kind: "AMBULANCE".to_string(),
            })
            .await
            .unwrap();
        transport.drain(addr(1));
        transport.drain(addr(2));
        transport.drain(addr(4));

        engine
            .handle_message(Message::PreemptClear { sender: NodeId(3) })
            .await
            .unwrap();

        let state = engine.state().snapshot().await;
        assert!(!state.emergency_active);
        assert!(state.emergency_kind.is_empty());
        let clear = Message::PreemptClear { sender: NodeId(3) };
        for id in [1, 2, 4] {
            assert_eq!(inbox(&transport, id), vec![clear.clone()]);
        }
    }

    #[tokio::test]
    async fn test_normal_handover() {
        let (engine, transport) = engine(1, NodeState::bootstrap());

        let plan = engine.handover().await.unwrap();
        assert_eq!(plan.kind, HandoverKind::Normal);
        assert_eq!(plan.target, NodeId(2));
        assert!(!engine.state().holds_token().await);
        assert_eq!(
            inbox(&transport, 2),
            vec![Message::Token {
                sender: NodeId(1),
                return_to: None
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_handover_keeps_token() {
        let (engine, transport) = engine(1, holding_with_yield(3));
        transport.set_unreachable(addr(3), true);

        let err = engine.handover().await.unwrap_err();
        assert!(matches!(err, Error::Handover(_)));

        let state = engine.state().snapshot().await;
        assert!(state.holds_token);
        assert_eq!(state.yield_request, Some(NodeId(3)));
    }

    #[tokio::test]
    async fn test_yield_handover_carries_successor() {
        let (engine, transport) = engine(1, holding_with_yield(3));

        let plan = engine.handover().await.unwrap();
        assert_eq!(
            plan,
            HandoverPlan {
                target: NodeId(3),
                return_to: Some(NodeId(2)),
                kind: HandoverKind::Yield,
            }
        );
        assert_eq!(engine.state().snapshot().await, NodeState::default());
        assert_eq!(
            inbox(&transport, 3),
            vec![Message::Token {
                sender: NodeId(1),
                return_to: Some(NodeId(2))
            }]
        );
    }

    #[tokio::test]
    async fn test_yield_to_successor_is_normal() {
        let (engine, _) = engine(1, holding_with_yield(2));
        let plan = engine.plan_handover().await.unwrap();
        assert_eq!(plan.kind, HandoverKind::Normal);
        assert_eq!(plan.target, NodeId(2));
    }

    #[tokio::test]
    async fn test_return_handover_consumes_address() {
        let state = NodeState {
            return_address: Some(NodeId(2)),
            ..NodeState::bootstrap()
        };
        let (engine, transport) = engine(3, state);

        let plan = engine.handover().await.unwrap();
        assert_eq!(plan.kind, HandoverKind::Return);
        assert_eq!(plan.target, NodeId(2));
        assert_eq!(engine.state().snapshot().await.return_address, None);
        assert_eq!(inbox(&transport, 2).len(), 1);
        assert!(inbox(&transport, 4).is_empty());
    }

    #[tokio::test]
    async fn test_handover_without_token_rejected() {
        let (engine, _) = engine(1, NodeState::default());
        assert!(matches!(
            engine.handover().await.unwrap_err(),
            Error::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_reseed_token() {
        let (engine, _) = engine(2, NodeState::default());
        assert!(engine.reseed_token().await);
        assert!(engine.state().holds_token().await);
        assert!(!engine.reseed_token().await);
    }
}
