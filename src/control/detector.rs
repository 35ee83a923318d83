//! Vehicle detection collaborator
//!
//! The detection model itself lives outside this crate. The phase machine
//! only ever asks for a count at the instant it enters CALCULATE.

/// Source of vehicle counts for one approach
pub trait VehicleDetector: Send {
    /// Number of vehicles waiting right now
    fn vehicle_count(&mut self) -> u32;
}

/// Always reports the same count
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCount(pub u32);

impl VehicleDetector for FixedCount {
    fn vehicle_count(&mut self) -> u32 {
        self.0
    }
}

/// Replays a list of counts, wrapping around at the end
#[derive(Debug, Clone, Default)]
pub struct ScriptedCounts {
    counts: Vec<u32>,
    next: usize,
}

impl ScriptedCounts {
    pub fn new(counts: Vec<u32>) -> Self {
        ScriptedCounts { counts, next: 0 }
    }
}

impl VehicleDetector for ScriptedCounts {
    fn vehicle_count(&mut self) -> u32 {
        if self.counts.is_empty() {
            return 0;
        }
        let count = self.counts[self.next];
        self.next = (self.next + 1) % self.counts.len();
        count
    }
}

impl<D: VehicleDetector + ?Sized> VehicleDetector for Box<D> {
    fn vehicle_count(&mut self) -> u32 {
        (**self).vehicle_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_counts_wrap() {
        let mut detector = ScriptedCounts::new(vec![3, 0, 12]);
        let seen: Vec<u32> = (0..5).map(|_| detector.vehicle_count()).collect();
        assert_eq!(seen, vec![3, 0, 12, 3, 0]);
    }

    #[test]
    fn test_empty_script_reports_zero() {
        assert_eq!(ScriptedCounts::default().vehicle_count(), 0);
    }

    #[test]
    fn test_boxed_detector() {
        let mut detector: Box<dyn VehicleDetector> = Box::new(FixedCount(4));
        assert_eq!(detector.vehicle_count(), 4);
    }
}
