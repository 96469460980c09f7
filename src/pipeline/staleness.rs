//! Last-packet clock
//!
//! The render callback must not replay stale audio once the sender goes
//! away, so it checks this tracker before touching the jitter buffer. The
//! arrival time lives in an atomic so the check never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Receiver session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No packet yet, or none within the staleness window: play silence
    Idle,
    /// Packets are arriving: play from the jitter buffer
    Active,
}

pub struct StalenessTracker {
    epoch: Instant,
    /// Nanoseconds since `epoch` of the last packet, plus one; zero means never
    last_packet: AtomicU64,
    window: Duration,
}

impl StalenessTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            last_packet: AtomicU64::new(0),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a packet arrival, returning the state just before it
    pub fn record_packet(&self, now: Instant) -> SessionState {
        let previous = self.state(now);
        let stamp = self.nanos_since_epoch(now).saturating_add(1);
        self.last_packet.fetch_max(stamp, Ordering::AcqRel);
        previous
    }

    /// Time since the last packet, `None` if none was ever recorded
    pub fn last_packet_age(&self, now: Instant) -> Option<Duration> {
        match self.last_packet.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(Duration::from_nanos(
                self.nanos_since_epoch(now).saturating_sub(stamp - 1),
            )),
        }
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_packet_age(now) {
            None => true,
            Some(age) => age >= self.window,
        }
    }

    pub fn state(&self, now: Instant) -> SessionState {
        if self.is_stale(now) {
            SessionState::Idle
        } else {
            SessionState::Active
        }
    }

    fn nanos_since_epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(20);

    #[test]
    fn test_never_seen_is_idle() {
        let tracker = StalenessTracker::new(WINDOW);
        assert!(tracker.is_stale(Instant::now()));
        assert_eq!(tracker.last_packet_age(Instant::now()), None);
    }

    #[test]
    fn test_window_boundary() {
        let tracker = StalenessTracker::new(WINDOW);
        let t0 = Instant::now();

        assert_eq!(tracker.record_packet(t0), SessionState::Idle);
        assert_eq!(tracker.state(t0 + Duration::from_millis(19)), SessionState::Active);
        assert_eq!(tracker.state(t0 + WINDOW), SessionState::Idle);
        assert_eq!(tracker.state(t0 + Duration::from_millis(500)), SessionState::Idle);
    }

    #[test]
    fn test_new_packet_reactivates() {
        let tracker = StalenessTracker::new(WINDOW);
        let t0 = Instant::now();
        tracker.record_packet(t0);

        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(tracker.record_packet(t1), SessionState::Idle);
        assert_eq!(tracker.record_packet(t1 + Duration::from_millis(5)), SessionState::Active);
        assert_eq!(
            tracker.last_packet_age(t1 + Duration::from_millis(8)),
            Some(Duration::from_millis(3))
        );
    }

    #[test]
    fn test_older_timestamp_does_not_rewind() {
        let tracker = StalenessTracker::new(WINDOW);
        let t0 = Instant::now();
        tracker.record_packet(t0 + Duration::from_millis(50));
        tracker.record_packet(t0);
        assert_eq!(tracker.state(t0 + Duration::from_millis(60)), SessionState::Active);
    }
}
