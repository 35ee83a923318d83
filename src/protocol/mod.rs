//! Protocol implementation module
//!
//! This module defines the ring messages, their wire encoding, and the
//! per-node coordination state they mutate.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::{decode_message, encode_message, encode_snapshot, MessageCodec};
pub use self::message::{Message, PhaseSnapshot};
pub use self::state::{NodeState, SharedState};
