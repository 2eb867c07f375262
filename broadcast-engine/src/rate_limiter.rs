//! Per-recipient sliding-window rate limiting (§4.3).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct State {
    timestamps: VecDeque<Instant>,
    last_seen: Instant,
}

/// A single recipient's admission window. `allow()` is O(1) amortized:
/// expired timestamps are trimmed from the head before the check.
pub struct RateLimiter {
    state: Mutex<State>,
    max_events_per_window: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_events_per_window: u32, window: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(State { timestamps: VecDeque::new(), last_seen: now }),
            max_events_per_window,
            window,
        }
    }

    /// Trims expired timestamps, then admits the event if the window isn't
    /// already full. At the exact limit, the call is rejected until the
    /// oldest timestamp ages out.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.last_seen = now;
        Self::trim(&mut state.timestamps, now, self.window);
        if state.timestamps.len() as u32 >= self.max_events_per_window {
            return false;
        }
        state.timestamps.push_back(now);
        true
    }

    pub fn current_rate(&self) -> u32 {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::trim(&mut state.timestamps, now, self.window);
        state.timestamps.len() as u32
    }

    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_seen.elapsed()
    }

    fn trim(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert_eq!(limiter.current_rate(), 3);
    }

    #[test]
    fn admits_again_after_window_expires() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow());
    }

    #[test]
    fn idle_for_tracks_time_since_last_call() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        limiter.allow();
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.idle_for() >= Duration::from_millis(10));
    }

    // Invariant 3 (§8): for any recipient and any 1-second window, the
    // number of admitted events never exceeds max_events_per_user. Calling
    // `allow()` back-to-back with no sleep is the worst case for a 1-second
    // window — every call lands in the same window.
    proptest! {
        #[test]
        fn admitted_count_never_exceeds_the_limit(max in 1u32..50, attempts in 0u32..200) {
            let limiter = RateLimiter::new(max, Duration::from_secs(1));
            let admitted = (0..attempts).filter(|_| limiter.allow()).count() as u32;
            prop_assert!(admitted <= max);
            prop_assert_eq!(admitted, attempts.min(max));
        }
    }
}
