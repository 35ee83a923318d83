//! Core types for the signal ring
//!
//! This module contains the identifiers, configuration, topology and error
//! types used throughout the library.

pub mod error;
pub mod serde;
pub mod topology;
pub mod types;

use std::time::Duration;

pub use self::error::{Error, Result};
pub use self::topology::RingTopology;
pub use self::types::{NodeEntry, NodeId, RingConfig};

/// Default bound on a single connect-and-send
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Default control tick cadence
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30);

/// How long a listener waits for an accepted connection to deliver its payload
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum accepted wire payload in bytes
pub const MAX_PAYLOAD_SIZE: usize = 4096;
