//! Traffic phase control
//!
//! The per-node phase state machine, the timing policy it applies when the
//! token arrives, and the detection collaborator it samples.

pub mod detector;
pub mod phase;
pub mod timing;

pub use self::detector::{FixedCount, ScriptedCounts, VehicleDetector};
pub use self::phase::{Phase, PhaseMachine, Step, TokenView};
pub use self::timing::TimingConfig;
