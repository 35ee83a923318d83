use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::trace;

use super::Transport;
use crate::core::{Error, Result};

#[derive(Debug, Default)]
struct MemoryNetwork {
    /// Undelivered payloads per registered address
    mailboxes: HashMap<SocketAddr, VecDeque<Bytes>>,
    /// Registered addresses that currently refuse connections
    unreachable: HashSet<SocketAddr>,
}

/// In-process transport for simulated rings
///
/// Sends succeed only towards registered, reachable addresses and land in a
/// per-address mailbox. The test harness decides when (and whether) to
/// deliver them, which makes message loss, delay and reordering explicit.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    network: Arc<Mutex<MemoryNetwork>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn network(&self) -> MutexGuard<'_, MemoryNetwork> {
        // A panic elsewhere cannot leave the mailboxes half-written
        self.network.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `addr` accept payloads
    pub fn register(&self, addr: SocketAddr) {
        self.network().mailboxes.entry(addr).or_default();
    }

    /// Simulates a crashed or partitioned endpoint
    pub fn set_unreachable(&self, addr: SocketAddr, unreachable: bool) {
        let mut network = self.network();
        if unreachable {
            network.unreachable.insert(addr);
        } else {
            network.unreachable.remove(&addr);
        }
    }

    /// Removes and returns everything queued for `addr`
    pub fn drain(&self, addr: SocketAddr) -> Vec<Bytes> {
        self.network()
            .mailboxes
            .get_mut(&addr)
            .map(|mailbox| mailbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of payloads queued for `addr`
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.network()
            .mailboxes
            .get(&addr)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, target: SocketAddr, payload: Bytes) -> Result<()> {
        let mut network = self.network();
        if network.unreachable.contains(&target) {
            return Err(Error::network(format!("Connection to {} refused", target)));
        }
        match network.mailboxes.get_mut(&target) {
            Some(mailbox) => {
                trace!(%target, bytes = payload.len(), "Queued payload");
                mailbox.push_back(payload);
                Ok(())
            }
            None => Err(Error::network(format!("No listener at {}", target))),
        }
    }
}
