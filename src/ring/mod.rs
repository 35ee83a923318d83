//! Ring protocol module
//!
//! Token receipt, preemption handling and token handover, plus the backoff
//! and alarm policy applied when a handover cannot be delivered.

pub mod engine;
pub mod retry;

pub use self::engine::{BroadcastReport, Disposition, HandoverKind, HandoverPlan, RingEngine};
pub use self::retry::{HandoverAlarm, HandoverRetry, RetryConfig, RetryDecision};
