//! Network transport module
//!
//! Best-effort, connection-per-message delivery between controllers. A send
//! either completes within its timeout or reports a failure; nothing is
//! retried here.

mod connection;
mod memory;

pub use self::connection::{bind_listener, MessageListener, TcpTransport};
pub use self::memory::MemoryTransport;

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::core::Result;

/// Point-to-point delivery of a single encoded payload
pub trait Transport: Clone + Send + Sync + 'static {
    /// Delivers `payload` to `target`, or reports why it could not
    fn send(&self, target: SocketAddr, payload: Bytes) -> impl Future<Output = Result<()>> + Send;
}
