use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::{Error, NodeId, Result};
use crate::util::jitter;

/// Backoff policy for a failed token handover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub initial_backoff: Duration,
    /// Ceiling for the doubling backoff
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub max_backoff: Duration,
    /// How long handovers may keep failing before an alarm is raised
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub alarm_after: Duration,
    /// Relative spread applied to each backoff, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            alarm_after: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(Error::config("retry.initial_backoff must be positive"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::config("retry.initial_backoff must not exceed retry.max_backoff"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::config("retry.jitter must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    /// Un-jittered backoff after `failures` consecutive failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Operator-visible alarm: the token is stuck on this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverAlarm {
    /// Node that holds the stranded token
    pub node: NodeId,
    /// Node it has been trying to reach
    pub target: NodeId,
    /// Consecutive failed attempts so far
    pub attempts: u32,
    /// Wall-clock time of the first failure
    pub failing_since: DateTime<Utc>,
    pub last_error: String,
}

impl fmt::Display for HandoverAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node {} cannot hand the token to node {} ({} attempts since {}): {}",
            self.node,
            self.target,
            self.attempts,
            self.failing_since.to_rfc3339(),
            self.last_error
        )
    }
}

/// What to do after a failed handover
#[derive(Debug, Clone)]
pub struct RetryDecision {
    /// Wait this long before the next attempt
    pub backoff: Duration,
    /// Set when this failure crossed the alarm threshold
    pub raised: Option<HandoverAlarm>,
}

/// Tracks consecutive handover failures for one node
#[derive(Debug)]
pub struct HandoverRetry {
    node: NodeId,
    config: RetryConfig,
    failures: u32,
    first_failure: Option<(Instant, DateTime<Utc>)>,
    alarm: Option<HandoverAlarm>,
}

impl HandoverRetry {
    pub fn new(node: NodeId, config: RetryConfig) -> Self {
        HandoverRetry {
            node,
            config,
            failures: 0,
            first_failure: None,
            alarm: None,
        }
    }

    /// Consecutive failures since the last successful handover
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Currently raised alarm, if any
    pub fn alarm(&self) -> Option<&HandoverAlarm> {
        self.alarm.as_ref()
    }

    /// Records a failed attempt towards `target`
    pub fn record_failure(&mut self, target: NodeId, error: &Error, now: Instant) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        let (started, started_wall) = *self.first_failure.get_or_insert((now, Utc::now()));

        let backoff = jitter(
            self.config.backoff(self.failures),
            self.config.jitter,
            &mut rand::thread_rng(),
        );

        let mut raised = None;
        if now.duration_since(started) >= self.config.alarm_after {
            let alarm = HandoverAlarm {
                node: self.node,
                target,
                attempts: self.failures,
                failing_since: started_wall,
                last_error: error.to_string(),
            };
            if self.alarm.is_none() {
                raised = Some(alarm.clone());
            }
            self.alarm = Some(alarm);
        }

        RetryDecision { backoff, raised }
    }

    /// Records a successful handover; returns the alarm it clears, if any
    pub fn record_success(&mut self) -> Option<HandoverAlarm> {
        self.failures = 0;
        self.first_failure = None;
        self.alarm.take()
    }
}
