//! Runs one ring controller, or injects emergency signals into a running ring.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use signal_ring::control::{FixedCount, ScriptedCounts, VehicleDetector};
use signal_ring::network::{TcpTransport, Transport};
use signal_ring::node::spawn_node;
use signal_ring::protocol::{encode_message, Message};
use signal_ring::{NodeId, RingConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ring-node")]
#[command(about = "Token-ring traffic signal controller")]
struct Args {
    /// Ring configuration file; the built-in four-way ring when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller for one lane
    Run {
        /// Lane (node) id
        #[arg(short, long)]
        node: u32,

        /// Vehicle counts to replay, one per green decision
        #[arg(short, long, value_delimiter = ',', default_value = "0")]
        vehicle_counts: Vec<u32>,
    },

    /// Signal an approaching emergency vehicle to a lane
    Priority {
        /// Lane (node) id
        #[arg(short, long)]
        node: u32,

        /// Vehicle kind reported to the lane
        #[arg(short, long, default_value = "AMBULANCE")]
        kind: String,

        /// Signal that the emergency has passed instead
        #[arg(long)]
        clear: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> signal_ring::Result<RingConfig> {
    match path {
        Some(path) => RingConfig::load(path),
        None => Ok(RingConfig::default()),
    }
}

fn detector(counts: Vec<u32>) -> Box<dyn VehicleDetector> {
    match counts.as_slice() {
        [count] => Box::new(FixedCount(*count)),
        _ => Box::new(ScriptedCounts::new(counts)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Run {
            node,
            vehicle_counts,
        } => {
            let id = NodeId(node);
            let order = config.topology()?.cycle_from(id);
            info!(node = %id, order = ?order, "Starting lane controller");

            let handle = spawn_node(&config, id, detector(vehicle_counts)).await?;
            tokio::signal::ctrl_c().await?;
            info!(node = %id, "Shutting down");
            handle.shutdown();
        }

        Command::Priority { node, kind, clear } => {
            let id = NodeId(node);
            let addr = config.node(id)?.addr;
            let message = if clear {
                Message::PreemptClear { sender: id }
            } else {
                Message::PriorityRequest { vehicle_kind: kind }
            };

            let transport = TcpTransport::new(Duration::from_secs(2));
            match transport.send(addr, encode_message(&message)?).await {
                Ok(()) => info!(lane = %id, %addr, kind = message.kind(), "Signal sent"),
                Err(e) => {
                    error!(lane = %id, error = %e, "Lane is not reachable");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
