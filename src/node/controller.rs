use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::control::{Phase, PhaseMachine, Step, TimingConfig, TokenView, VehicleDetector};
use crate::core::{Error, NodeId, Result};
use crate::network::Transport;
use crate::protocol::{encode_snapshot, PhaseSnapshot};
use crate::ring::{HandoverAlarm, HandoverRetry, RetryConfig, RingEngine};

/// Drives one node's phase machine from its ring state
///
/// Each tick reads the node state once, advances the phase machine, performs
/// a handover when clearance expires, and publishes a snapshot.
pub struct Controller<T: Transport, D: VehicleDetector> {
    engine: RingEngine<T>,
    machine: PhaseMachine,
    retry: HandoverRetry,
    detector: D,
    visualizer: Option<SocketAddr>,
    alarm_tx: watch::Sender<Option<HandoverAlarm>>,
}

impl<T: Transport, D: VehicleDetector> Controller<T, D> {
    pub fn new(
        engine: RingEngine<T>,
        timing: TimingConfig,
        retry: RetryConfig,
        detector: D,
        starts_with_token: bool,
    ) -> Self {
        let (alarm_tx, _) = watch::channel(None);
        Controller {
            retry: HandoverRetry::new(engine.id(), retry),
            machine: PhaseMachine::new(timing, starts_with_token),
            engine,
            detector,
            visualizer: None,
            alarm_tx,
        }
    }

    /// Publishes a snapshot to `addr` after every tick
    pub fn with_visualizer(mut self, addr: Option<SocketAddr>) -> Self {
        self.visualizer = addr;
        self
    }

    pub fn id(&self) -> NodeId {
        self.engine.id()
    }

    pub fn engine(&self) -> &RingEngine<T> {
        &self.engine
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Seconds remaining in the current phase
    pub fn timer(&self) -> f64 {
        self.machine.timer()
    }

    pub fn vehicle_count(&self) -> u32 {
        self.machine.vehicle_count()
    }

    /// Watches the stranded-token alarm
    pub fn alarms(&self) -> watch::Receiver<Option<HandoverAlarm>> {
        self.alarm_tx.subscribe()
    }

    /// Runs one control tick covering `dt` of elapsed time
    pub async fn tick(&mut self, dt: Duration) -> Result<Step> {
        let view = {
            let state = self.engine.state().lock().await;
            TokenView {
                holds_token: state.holds_token,
                yield_pending: state.yield_request.is_some(),
            }
        };

        let step = self.machine.step(dt, view, &mut self.detector);
        match step {
            Step::Idle => {}
            Step::Entered(phase) => {
                info!(
                    node = %self.id(),
                    %phase,
                    timer = self.machine.timer(),
                    vehicles = self.machine.vehicle_count(),
                    "Phase change"
                );
            }
            Step::HandoverDue => self.hand_over().await?,
        }

        if let Some(addr) = self.visualizer {
            let snapshot = PhaseSnapshot {
                lane_id: self.id(),
                car_count: self.machine.vehicle_count(),
                request_green: self.machine.phase() == Phase::Green,
            };
            publish_snapshot(&self.engine, addr, &snapshot).await;
        }
        Ok(step)
    }

    async fn hand_over(&mut self) -> Result<()> {
        let plan = match self.engine.plan_handover().await {
            Ok(plan) => plan,
            Err(Error::InvalidState(reason)) => {
                warn!(node = %self.id(), %reason, "Clearance ended without the token");
                self.machine.abandon_handover();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match self.engine.execute_handover(&plan).await {
            Ok(()) => {
                self.machine.handover_succeeded();
                if let Some(alarm) = self.retry.record_success() {
                    info!(node = %self.id(), attempts = alarm.attempts, "Handover recovered");
                    self.alarm_tx.send_replace(None);
                }
                Ok(())
            }
            Err(e @ Error::Handover(_)) => {
                let decision = self.retry.record_failure(plan.target, &e, Instant::now());
                self.machine.handover_failed(decision.backoff);
                if let Some(alarm) = decision.raised {
                    error!(node = %self.id(), %alarm, "Token stranded on this node");
                    self.alarm_tx.send_replace(Some(alarm));
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Sends `snapshot` to the visualizer; it is optional, so failures are only logged
async fn publish_snapshot<T: Transport>(
    engine: &RingEngine<T>,
    addr: SocketAddr,
    snapshot: &PhaseSnapshot,
) {
    let sent = match encode_snapshot(snapshot) {
        Ok(payload) => engine.transport().send(addr, payload).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        debug!(node = %engine.id(), error = %e, "Visualizer unreachable");
    }
}
