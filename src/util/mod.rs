//! Utility module
//!
//! Small helpers shared by the control and ring modules.

use rand::Rng;
use std::time::Duration;

/// Converts a duration to a floating-point number of seconds
pub fn duration_to_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Converts seconds to a duration, saturating instead of panicking on
/// negative or out-of-range input
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Spreads `base` uniformly by up to `fraction` in either direction
pub fn jitter<R: Rng>(base: Duration, fraction: f64, rng: &mut R) -> Duration {
    if fraction <= 0.0 {
        return base;
    }
    let fraction = fraction.min(1.0);
    let factor = rng.gen_range(1.0 - fraction..=1.0 + fraction);
    secs_to_duration(duration_to_secs(base) * factor)
}
