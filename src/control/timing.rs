use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Phase timing policy
///
/// Green time is a pure function of one sampled vehicle count so it can be
/// audited and swapped without touching the token logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Green time granted per detected vehicle
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub per_vehicle: Duration,
    /// Lower bound once any vehicle is present
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub min_green: Duration,
    /// Upper bound so no lane monopolizes the ring
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub max_green: Duration,
    /// Courtesy green for an empty approach
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub empty_green: Duration,
    /// Fixed clearance interval
    #[serde(serialize_with = "crate::core::serde::serialize_duration")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_duration")]
    pub yellow: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            per_vehicle: Duration::from_secs(2),
            min_green: Duration::from_secs(5),
            max_green: Duration::from_secs(40),
            empty_green: Duration::from_secs(2),
            yellow: Duration::from_secs(3),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_green > self.max_green {
            return Err(Error::config("timing.min_green must not exceed timing.max_green"));
        }
        if self.per_vehicle.is_zero() || self.empty_green.is_zero() || self.yellow.is_zero() {
            return Err(Error::config(
                "timing.per_vehicle, timing.empty_green and timing.yellow must be positive",
            ));
        }
        Ok(())
    }

    /// Green duration for an approach with `vehicle_count` waiting vehicles
    pub fn green_time(&self, vehicle_count: u32) -> Duration {
        if vehicle_count == 0 {
            return self.empty_green;
        }
        self.per_vehicle
            .saturating_mul(vehicle_count)
            .max(self.min_green)
            .min(self.max_green)
    }

    /// Clearance interval; independent of traffic volume
    pub fn yellow_time(&self) -> Duration {
        self.yellow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(count: u32) -> f64 {
        TimingConfig::default().green_time(count).as_secs_f64()
    }

    #[test]
    fn test_green_time_table() {
        assert_eq!(secs(0), 2.0);
        assert_eq!(secs(1), 5.0);
        assert_eq!(secs(3), 6.0);
        assert_eq!(secs(20), 40.0);
        assert_eq!(secs(25), 40.0);
        assert_eq!(secs(u32::MAX), 40.0);
    }

    #[test]
    fn test_green_time_monotonic() {
        let timing = TimingConfig::default();
        for count in 1..20 {
            assert!(timing.green_time(count) <= timing.green_time(count + 1));
        }
    }

    #[test]
    fn test_yellow_is_fixed() {
        assert_eq!(TimingConfig::default().yellow_time(), Duration::from_secs(3));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let timing = TimingConfig {
            min_green: Duration::from_secs(50),
            ..Default::default()
        };
        assert!(timing.validate().is_err());
        assert!(TimingConfig::default().validate().is_ok());
    }
}
