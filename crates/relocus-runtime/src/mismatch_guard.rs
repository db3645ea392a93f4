//! [`EpochMismatchGuard`] – persistent frame-epoch desync detector.
//!
//! Every odometry tick reports the frame epoch the firmware believes is
//! current. A few ticks of lag after a correction are normal; a long unbroken
//! run of mismatches means the firmware never received the correction and
//! the coordinator should start over.
//!
//! # Example
//!
//! ```rust
//! use relocus_runtime::mismatch_guard::EpochMismatchGuard;
//!
//! let mut guard = EpochMismatchGuard::new(2);
//!
//! assert!(!guard.record(false));
//! assert!(!guard.record(false));
//! assert!(guard.record(false)); // third mismatch in a row → desynced
//!
//! // The counter restarts after tripping.
//! assert!(!guard.record(false));
//! ```

/// Counts consecutive ticks whose frame epoch did not match the current one.
#[derive(Debug, Clone)]
pub struct EpochMismatchGuard {
    /// Mismatches tolerated before tripping.
    threshold: u32,
    consecutive: u32,
}

impl EpochMismatchGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: 0,
        }
    }

    /// Record one tick. Returns `true` once more than `threshold` consecutive
    /// ticks have mismatched, and restarts the count.
    pub fn record(&mut self, frame_is_current: bool) -> bool {
        if frame_is_current {
            self.consecutive = 0;
            return false;
        }
        self.consecutive += 1;
        if self.consecutive > self.threshold {
            self.consecutive = 0;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_ticks_never_trip() {
        let mut guard = EpochMismatchGuard::new(3);
        for _ in 0..10 {
            assert!(!guard.record(true));
        }
        assert_eq!(guard.count(), 0);
    }

    #[test]
    fn trips_only_past_threshold() {
        let mut guard = EpochMismatchGuard::new(3);
        assert!(!guard.record(false));
        assert!(!guard.record(false));
        assert!(!guard.record(false));
        assert_eq!(guard.count(), 3);
        assert!(guard.record(false));
        assert_eq!(guard.count(), 0);
    }

    #[test]
    fn matching_tick_breaks_streak() {
        let mut guard = EpochMismatchGuard::new(2);
        guard.record(false);
        guard.record(false);
        assert!(!guard.record(true));
        assert!(!guard.record(false));
        assert!(!guard.record(false));
        assert!(guard.record(false));
    }

    #[test]
    fn reset_clears_count() {
        let mut guard = EpochMismatchGuard::new(1);
        guard.record(false);
        guard.reset();
        assert!(!guard.record(false));
        assert!(guard.record(false));
    }
}
