//! Drift-free capture gate.
//!
//! Capture `n` of a phase is due at `phase_start + n * interval`. The next
//! deadline is always derived from the phase start and the number of captures
//! taken, never from the time the last capture actually fired, so a late tick
//! does not push every later capture back.

use std::time::Duration;

/// Decides on each tick whether a capture is due.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    phase_start: Duration,
    captures: u32,
}

impl FramePacer {
    /// Pacer with the given interval whose first capture is due at `start`.
    pub fn new(interval: Duration, start: Duration) -> Self {
        Self {
            interval,
            phase_start: start,
            captures: 0,
        }
    }

    /// Restart scheduling for a new phase at `start`.
    pub fn restart(&mut self, start: Duration) {
        self.phase_start = start;
        self.captures = 0;
    }

    /// Capture interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next capture is due. Saturates at `Duration::MAX`.
    pub fn next_due(&self) -> Duration {
        self.interval
            .checked_mul(self.captures)
            .and_then(|offset| self.phase_start.checked_add(offset))
            .unwrap_or(Duration::MAX)
    }

    /// Captures taken in the current phase.
    pub fn captures(&self) -> u32 {
        self.captures
    }

    /// Returns true and schedules the following capture if one is due at `now`.
    ///
    /// At most one capture fires per call, however far behind the caller is.
    pub fn poll(&mut self, now: Duration) -> bool {
        if now < self.next_due() {
            return false;
        }
        self.captures = self.captures.saturating_add(1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_capture_fires_at_start() {
        let mut pacer = FramePacer::new(Duration::from_millis(500), Duration::from_secs(1));
        assert!(!pacer.poll(Duration::from_millis(999)));
        assert!(pacer.poll(Duration::from_secs(1)));
        assert!(!pacer.poll(Duration::from_secs(1)));
        assert_eq!(pacer.next_due(), Duration::from_millis(1500));
    }

    #[test]
    fn test_late_tick_does_not_accumulate_drift() {
        let mut pacer = FramePacer::new(Duration::from_millis(100), Duration::ZERO);
        assert!(pacer.poll(Duration::ZERO));
        // tick arrives 40ms late
        assert!(pacer.poll(Duration::from_millis(140)));
        // next deadline still on the 100ms grid
        assert_eq!(pacer.next_due(), Duration::from_millis(200));
    }

    #[test]
    fn test_restart_resets_grid() {
        let mut pacer = FramePacer::new(Duration::from_millis(100), Duration::ZERO);
        pacer.poll(Duration::ZERO);
        pacer.poll(Duration::from_millis(100));
        pacer.restart(Duration::from_millis(1000));
        assert_eq!(pacer.captures(), 0);
        assert_eq!(pacer.next_due(), Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_interval_saturates() {
        let mut pacer = FramePacer::new(Duration::MAX / 2, Duration::from_secs(1));
        assert!(pacer.poll(Duration::from_secs(1)));
        assert!(!pacer.poll(Duration::from_secs(2)));
        assert!(pacer.poll(Duration::MAX));
        assert_eq!(pacer.next_due(), Duration::MAX);
    }
}
