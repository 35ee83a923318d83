//! Node runtime
//!
//! Wires one controller's two concurrent activities together: the receive
//! task that applies inbound messages to the node state, and the control
//! task that ticks the phase machine on a fixed cadence.

mod controller;

pub use self::controller::Controller;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::control::VehicleDetector;
use crate::core::{NodeId, Result, RingConfig, DEFAULT_READ_TIMEOUT};
use crate::network::{MessageListener, TcpTransport};
use crate::protocol::{Message, NodeState, SharedState};
use crate::ring::{Disposition, HandoverAlarm, RingEngine};

/// Capacity of the queue between the listener and the ring engine
const INBOUND_QUEUE: usize = 64;

/// Handle to a running node
pub struct NodeHandle {
    id: NodeId,
    local_addr: SocketAddr,
    state: SharedState,
    alarms: watch::Receiver<Option<HandoverAlarm>>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The node's shared coordination state
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Watches the stranded-token alarm
    pub fn alarms(&self) -> watch::Receiver<Option<HandoverAlarm>> {
        self.alarms.clone()
    }

    /// Stops every task of this node
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Binds the node's configured address and starts it
pub async fn spawn_node<D>(config: &RingConfig, id: NodeId, detector: D) -> Result<NodeHandle>
where
    D: VehicleDetector + 'static,
{
    let entry = config.node(id)?;
    let listener = MessageListener::bind(entry.addr, DEFAULT_READ_TIMEOUT).await?;
    spawn_with_listener(config, id, listener, detector)
}

/// Starts a node on an already bound listener
pub fn spawn_with_listener<D>(
    config: &RingConfig,
    id: NodeId,
    listener: MessageListener,
    detector: D,
) -> Result<NodeHandle>
where
    D: VehicleDetector + 'static,
{
    config.validate()?;
    let topology = Arc::new(config.topology()?);
    let local_addr = listener.local_addr()?;

    let bootstrap = config.bootstrap == id;
    let state = SharedState::new(if bootstrap {
        NodeState::bootstrap()
    } else {
        NodeState::default()
    });

    let transport = TcpTransport::new(config.send_timeout);
    let engine = RingEngine::new(id, topology, state.clone(), transport)?;
    let controller = Controller::new(
        engine.clone(),
        config.timing.clone(),
        config.retry.clone(),
        detector,
        bootstrap,
    )
    .with_visualizer(config.visualizer);
    let alarms = controller.alarms();

    let (message_tx, message_rx) = mpsc::channel(INBOUND_QUEUE);
    let tasks = vec![
        tokio::spawn(async move {
            if let Err(e) = listener.run(message_tx).await {
                error!(node = %id, error = %e, "Listener stopped");
            }
        }),
        tokio::spawn(receive_loop(engine, message_rx)),
        tokio::spawn(control_loop(controller, config.tick_interval)),
    ];

    info!(node = %id, addr = %local_addr, bootstrap, "Node started");
    Ok(NodeHandle {
        id,
        local_addr,
        state,
        alarms,
        tasks,
    })
}

async fn receive_loop(engine: RingEngine<TcpTransport>, mut message_rx: mpsc::Receiver<Message>) {
    while let Some(message) = message_rx.recv().await {
        let kind = message.kind();
        match engine.handle_message(message).await {
            Ok(Disposition::Applied) => {}
            Ok(Disposition::Ignored) => debug!(node = %engine.id(), kind, "Message ignored"),
            Err(e) => warn!(node = %engine.id(), kind, error = %e, "Failed to handle message"),
        }
    }
}

async fn control_loop<D: VehicleDetector>(
    mut controller: Controller<TcpTransport, D>,
    tick_interval: Duration,
) {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last);
        last = now;

        if let Err(e) = controller.tick(dt).await {
            error!(node = %controller.id(), error = %e, "Control tick failed");
        }
    }
}
