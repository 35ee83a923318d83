use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::topology::RingTopology;
use super::{Error, Result};
use crate::control::TimingConfig;
use crate::ring::RetryConfig;

/// Identifier of a controller in the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

/// A single controller as it appears in the ring configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// The controller's id
    pub id: NodeId,
    /// Address its listener binds to
    pub addr: SocketAddr,
    /// The node the token is handed to after this one
    pub successor: NodeId,
}

fn default_send_timeout() -> Duration {
    super::DEFAULT_SEND_TIMEOUT
}

fn default_tick_interval() -> Duration {
    super::DEFAULT_TICK_INTERVAL
}

/// Static configuration shared by every controller in a ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Node that holds the token at startup
    pub bootstrap: NodeId,
    /// Where phase snapshots are sent, if anywhere
    #[serde(default)]
    pub visualizer: Option<SocketAddr>,
    /// Upper bound on a single connect-and-send
    #[serde(default = "default_send_timeout")]
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub send_timeout: Duration,
    /// Control tick cadence
    #[serde(default = "default_tick_interval")]
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub tick_interval: Duration,
    /// Every controller in the ring
    pub nodes: Vec<NodeEntry>,
    /// Phase timing policy
    #[serde(default)]
    pub timing: TimingConfig,
    /// Handover retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RingConfig {
    /// Four approaches on localhost, N -> E -> S -> W, lane 1 starting green
    fn default() -> Self {
        let nodes = (1..=4u32)
            .map(|id| NodeEntry {
                id: NodeId(id),
                addr: SocketAddr::from(([127, 0, 0, 1], 5000 + id as u16)),
                successor: NodeId(id % 4 + 1),
            })
            .collect();

        RingConfig {
            bootstrap: NodeId(1),
            visualizer: Some(SocketAddr::from(([127, 0, 0, 1], 9999))),
            send_timeout: default_send_timeout(),
            tick_interval: default_tick_interval(),
            nodes,
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl RingConfig {
    /// Reads and validates a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates a TOML configuration
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RingConfig = toml::from_str(text)
            .map_err(|e| Error::config(format!("Failed to parse ring config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that serde alone cannot
    pub fn validate(&self) -> Result<()> {
        if self.send_timeout.is_zero() {
            return Err(Error::config("send_timeout must be positive"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::config("tick_interval must be positive"));
        }
        self.timing.validate()?;
        self.retry.validate()?;

        let topology = self.topology()?;
        if !topology.contains(self.bootstrap) {
            return Err(Error::config(format!(
                "Bootstrap node {} is not part of the ring",
                self.bootstrap
            )));
        }
        Ok(())
    }

    /// Builds the validated ring topology from the node list
    pub fn topology(&self) -> Result<RingTopology> {
        RingTopology::new(self.nodes.iter().cloned())
    }

    /// Looks up a node entry by id
    pub fn node(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| Error::config(format!("Node {} is not part of the ring", id)))
    }
}
