//! Signal Ring: token-ring coordination of traffic signal controllers
//!
//! A fixed ring of intersection controllers passes a single token around so
//! that exactly one approach is green at a time. An emergency vehicle can ask
//! the ring to yield early through a preemption overlay.
pub mod control;
pub mod core;
pub mod network;
pub mod node;
pub mod protocol;
pub mod ring;
mod util;

// Re-export commonly used items
pub use crate::core::{Error, NodeId, Result, RingConfig, RingTopology};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
