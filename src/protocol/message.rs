use serde::{Deserialize, Serialize};

use crate::core::NodeId;

/// Messages exchanged between controllers and their collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Hands token possession to the receiver
    Token {
        /// Node giving up the token
        sender: NodeId,
        /// If set, the receiver hands the token back here instead of to its
        /// normal successor
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_to: Option<NodeId>,
    },

    /// An emergency vehicle is approaching the receiver's approach
    PriorityRequest {
        /// Kind of vehicle, e.g. "AMBULANCE"
        vehicle_kind: String,
    },

    /// The sender asks every other node to yield the ring early
    PreemptRequest {
        sender: NodeId,
    },

    /// The emergency has ended; drop any pending yield
    PreemptClear {
        sender: NodeId,
    },
}

impl Message {
    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Token { .. } => "TOKEN",
            Message::PriorityRequest { .. } => "PRIORITY_REQUEST",
            Message::PreemptRequest { .. } => "PREEMPT_REQUEST",
            Message::PreemptClear { .. } => "PREEMPT_CLEAR",
        }
    }
}

/// Per-tick state published to the visualizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    /// Node publishing the snapshot
    pub lane_id: NodeId,
    /// Vehicle count from the latest sample
    pub car_count: u32,
    /// True while the lane is green
    pub request_green: bool,
}
