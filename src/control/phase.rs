use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::detector::VehicleDetector;
use super::timing::TimingConfig;
use crate::util::duration_to_secs;

/// Signal phase of one approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Waiting for the token
    Red,
    /// Token just arrived; green time is decided on the next tick
    Calculate,
    /// Right-of-way granted
    Green,
    /// Clearance before the token moves on
    Yellow,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Red => "RED",
            Phase::Calculate => "CALCULATE",
            Phase::Green => "GREEN",
            Phase::Yellow => "YELLOW",
        };
        f.write_str(name)
    }
}

/// What the phase machine sees of the node state on a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenView {
    pub holds_token: bool,
    pub yield_pending: bool,
}

/// Outcome of one control tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing changed beyond the countdown
    Idle,
    /// The machine moved into a new phase
    Entered(Phase),
    /// Yellow expired; the caller must attempt a handover and report back
    HandoverDue,
}

/// RED -> CALCULATE -> GREEN -> YELLOW cycle for one controller
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    /// Seconds left in the current phase; may dip below zero between ticks
    timer: f64,
    vehicle_count: u32,
    timing: TimingConfig,
}

impl PhaseMachine {
    /// Creates a machine starting in RED, or in CALCULATE for the node that
    /// bootstraps the ring
    pub fn new(timing: TimingConfig, starts_with_token: bool) -> Self {
        PhaseMachine {
            phase: if starts_with_token { Phase::Calculate } else { Phase::Red },
            timer: 0.0,
            vehicle_count: 0,
            timing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Seconds remaining in the current phase
    pub fn timer(&self) -> f64 {
        self.timer
    }

    /// Count sampled on the most recent CALCULATE entry
    pub fn vehicle_count(&self) -> u32 {
        self.vehicle_count
    }

    /// Advances the machine by `dt`
    pub fn step(
        &mut self,
        dt: Duration,
        view: TokenView,
        detector: &mut dyn VehicleDetector,
    ) -> Step {
        let dt = duration_to_secs(dt);
        match self.phase {
            Phase::Red => {
                if view.holds_token {
                    self.enter(Phase::Calculate, 0.0)
                } else {
                    Step::Idle
                }
            }
            Phase::Calculate => {
                self.vehicle_count = detector.vehicle_count();
                let green = self.timing.green_time(self.vehicle_count);
                self.enter(Phase::Green, duration_to_secs(green))
            }
            Phase::Green => {
                self.timer -= dt;
                if self.timer <= 0.0 || view.yield_pending {
                    self.enter(Phase::Yellow, duration_to_secs(self.timing.yellow_time()))
                } else {
                    Step::Idle
                }
            }
            Phase::Yellow => {
                self.timer -= dt;
                if self.timer <= 0.0 {
                    Step::HandoverDue
                } else {
                    Step::Idle
                }
            }
        }
    }

    /// The token left this node; wait for it to come back
    pub fn handover_succeeded(&mut self) {
        self.enter(Phase::Red, 0.0);
    }

    /// Clearance ended but the token is gone; nothing left to hand over
    pub fn abandon_handover(&mut self) {
        self.enter(Phase::Red, 0.0);
    }

    /// The token is still here; stay in clearance and try again after `backoff`
    pub fn handover_failed(&mut self, backoff: Duration) {
        self.timer = duration_to_secs(backoff);
    }

    fn enter(&mut self, phase: Phase, timer: f64) -> Step {
        self.phase = phase;
        self.timer = timer;
        Step::Entered(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::detector::FixedCount;

    const HOLDING: TokenView = TokenView {
        holds_token: true,
        yield_pending: false,
    };

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_red_waits_for_token() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), false);
        let mut detector = FixedCount(3);

        assert_eq!(
            machine.step(secs(1.0), TokenView::default(), &mut detector),
            Step::Idle
        );
        assert_eq!(machine.phase(), Phase::Red);

        assert_eq!(
            machine.step(secs(0.1), HOLDING, &mut detector),
            Step::Entered(Phase::Calculate)
        );
    }

    #[test]
    fn test_full_cycle() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), true);
        let mut detector = FixedCount(3);

        assert_eq!(
            machine.step(secs(0.03), HOLDING, &mut detector),
            Step::Entered(Phase::Green)
        );
        assert_eq!(machine.timer(), 6.0);
        assert_eq!(machine.vehicle_count(), 3);

        assert_eq!(machine.step(secs(5.0), HOLDING, &mut detector), Step::Idle);
        assert_eq!(
            machine.step(secs(1.0), HOLDING, &mut detector),
            Step::Entered(Phase::Yellow)
        );
        assert_eq!(machine.timer(), 3.0);

        assert_eq!(machine.step(secs(2.0), HOLDING, &mut detector), Step::Idle);
        assert_eq!(machine.step(secs(1.0), HOLDING, &mut detector), Step::HandoverDue);
        assert_eq!(machine.phase(), Phase::Yellow);

        machine.handover_succeeded();
        assert_eq!(machine.phase(), Phase::Red);
    }

    #[test]
    fn test_empty_lane_gets_courtesy_green() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), true);
        machine.step(secs(0.0), HOLDING, &mut FixedCount(0));
        assert_eq!(machine.phase(), Phase::Green);
        assert_eq!(machine.timer(), 2.0);
    }

    #[test]
    fn test_yellow_independent_of_traffic() {
        for count in [0, 1, 3, 25, 400] {
            let mut machine = PhaseMachine::new(TimingConfig::default(), true);
            let mut detector = FixedCount(count);
            machine.step(secs(0.0), HOLDING, &mut detector);
            machine.step(secs(60.0), HOLDING, &mut detector);
            assert_eq!(machine.phase(), Phase::Yellow);
            assert_eq!(machine.timer(), 3.0);
        }
    }

    #[test]
    fn test_pending_yield_cuts_green_short() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), true);
        let mut detector = FixedCount(20);
        machine.step(secs(0.0), HOLDING, &mut detector);
        assert_eq!(machine.timer(), 40.0);

        let yielding = TokenView {
            holds_token: true,
            yield_pending: true,
        };
        assert_eq!(
            machine.step(secs(0.03), yielding, &mut detector),
            Step::Entered(Phase::Yellow)
        );
        assert_eq!(machine.timer(), 3.0);
    }

    #[test]
    fn test_failed_handover_retries_from_yellow() {
        let mut machine = PhaseMachine::new(TimingConfig::default(), true);
        let mut detector = FixedCount(1);
        machine.step(secs(0.0), HOLDING, &mut detector);
        machine.step(secs(5.0), HOLDING, &mut detector);
        assert_eq!(machine.step(secs(3.0), HOLDING, &mut detector), Step::HandoverDue);

        machine.handover_failed(Duration::from_millis(500));
        assert_eq!(machine.phase(), Phase::Yellow);
        assert_eq!(machine.step(secs(0.25), HOLDING, &mut detector), Step::Idle);
        assert_eq!(machine.step(secs(0.25), HOLDING, &mut detector), Step::HandoverDue);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Calculate.to_string(), "CALCULATE");
        assert_eq!(Phase::Yellow.to_string(), "YELLOW");
    }
}
