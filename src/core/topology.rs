//! Fixed ring topology
//!
//! Maps every controller to its address and to the successor it hands the
//! token to. The successor relation must form exactly one directed cycle
//! through every node.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use super::types::{NodeEntry, NodeId};
use super::{Error, Result};

/// Validated ring of controllers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingTopology {
    addresses: BTreeMap<NodeId, SocketAddr>,
    successors: BTreeMap<NodeId, NodeId>,
}

impl RingTopology {
    /// Builds a topology from explicit node entries
    pub fn new(entries: impl IntoIterator<Item = NodeEntry>) -> Result<Self> {
        let mut addresses = BTreeMap::new();
        let mut successors = BTreeMap::new();
        let mut seen_addrs = BTreeSet::new();

        for entry in entries {
            if addresses.insert(entry.id, entry.addr).is_some() {
                return Err(Error::config(format!("Duplicate node id {}", entry.id)));
            }
            if !seen_addrs.insert(entry.addr) {
                return Err(Error::config(format!("Duplicate node address {}", entry.addr)));
            }
            if entry.successor == entry.id {
                return Err(Error::config(format!("Node {} is its own successor", entry.id)));
            }
            successors.insert(entry.id, entry.successor);
        }

        let topology = RingTopology { addresses, successors };
        topology.check_single_cycle()?;
        Ok(topology)
    }

    /// Builds a ring whose handover order is the order of `nodes`
    pub fn ordered(nodes: &[(NodeId, SocketAddr)]) -> Result<Self> {
        let entries = nodes.iter().enumerate().map(|(i, &(id, addr))| NodeEntry {
            id,
            addr,
            successor: nodes[(i + 1) % nodes.len()].0,
        });
        Self::new(entries.collect::<Vec<_>>())
    }

    fn check_single_cycle(&self) -> Result<()> {
        if self.addresses.len() < 2 {
            return Err(Error::config("A ring needs at least two nodes"));
        }

        for (id, successor) in &self.successors {
            if !self.addresses.contains_key(successor) {
                return Err(Error::config(format!(
                    "Node {} has unknown successor {}",
                    id, successor
                )));
            }
        }

        // Walk from any node; a single cycle returns to the start after
        // exactly `len` steps having visited every node once.
        let start = *self.addresses.keys().next().ok_or_else(|| Error::config("Empty ring"))?;
        let mut visited = BTreeSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current) {
                break;
            }
            current = self.successors[&current];
        }

        if current != start || visited.len() != self.addresses.len() {
            return Err(Error::config(
                "Successor mapping must form a single cycle through every node",
            ));
        }
        Ok(())
    }

    /// Number of nodes in the ring
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.addresses.contains_key(&id)
    }

    /// Network address of a node
    pub fn address(&self, id: NodeId) -> Option<SocketAddr> {
        self.addresses.get(&id).copied()
    }

    /// The node that follows `id` in the handover order
    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        self.successors.get(&id).copied()
    }

    /// Every node other than `id`, with its address
    pub fn peers(&self, id: NodeId) -> impl Iterator<Item = (NodeId, SocketAddr)> + '_ {
        self.addresses
            .iter()
            .filter(move |(peer, _)| **peer != id)
            .map(|(peer, addr)| (*peer, *addr))
    }

    /// One full trip around the ring starting at `start`
    pub fn cycle_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.len());
        let mut current = start;
        while order.len() < self.len() {
            order.push(current);
            match self.successor(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn entry(id: u32, successor: u32) -> NodeEntry {
        NodeEntry {
            id: NodeId(id),
            addr: addr(5000 + id as u16),
            successor: NodeId(successor),
        }
    }

    #[test]
    fn test_four_node_ring() {
        let ring =
            RingTopology::new(vec![entry(1, 2), entry(2, 3), entry(3, 4), entry(4, 1)]).unwrap();
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.successor(NodeId(4)), Some(NodeId(1)));
        assert_eq!(ring.address(NodeId(2)), Some(addr(5002)));
        assert_eq!(
            ring.cycle_from(NodeId(3)),
            vec![NodeId(3), NodeId(4), NodeId(1), NodeId(2)]
        );
        assert_eq!(ring.peers(NodeId(1)).count(), 3);
        assert!(ring.peers(NodeId(1)).all(|(id, _)| id != NodeId(1)));
    }

    #[test]
    fn test_self_successor_rejected() {
        let err = RingTopology::new(vec![entry(1, 1), entry(2, 1)]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_two_cycles_rejected() {
        let result = RingTopology::new(vec![entry(1, 2), entry(2, 1), entry(3, 4), entry(4, 3)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dangling_successor_rejected() {
        assert!(RingTopology::new(vec![entry(1, 2), entry(2, 9)]).is_err());
    }

    #[test]
    fn test_tail_into_cycle_rejected() {
        // 3 points into the 1 <-> 2 cycle but nothing points back to 3
        assert!(RingTopology::new(vec![entry(1, 2), entry(2, 1), entry(3, 1)]).is_err());
    }

    #[test]
    fn test_single_node_rejected() {
        assert!(RingTopology::ordered(&[(NodeId(1), addr(5001))]).is_err());
    }

    #[test]
    fn test_ordered_ring() {
        let ring = RingTopology::ordered(&[
            (NodeId(7), addr(6007)),
            (NodeId(3), addr(6003)),
            (NodeId(5), addr(6005)),
        ])
        .unwrap();
        assert_eq!(ring.successor(NodeId(7)), Some(NodeId(3)));
        assert_eq!(ring.successor(NodeId(5)), Some(NodeId(7)));
    }
}
