//! Per-connection inbound rate limiting
//!
//! Counts events in one-second windows. Events past the limit are dropped and
//! add to a violation score that halves every window, so a client slightly
//! over the limit is throttled while a sustained flood is disconnected.

use std::time::{Duration, Instant};

/// Violations from rate limiting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitViolation {
    #[error("Input rate exceeded: {0} events this second")]
    InputRateExceeded(u32),
    #[error("Too many rate limit violations ({0}), disconnecting")]
    TooManyViolations(u32),
}

/// Rate limits for a single connection
#[derive(Debug)]
pub struct ConnectionRateLimits {
    /// Events allowed per window
    pub max_events_per_second: u32,
    /// Violation score tolerated before disconnecting
    pub max_violations: u32,
    /// Events received in the current window
    pub events_this_second: u32,
    /// When the current window started
    pub second_start: Instant,
    /// Decaying count of dropped events
    pub violations: u32,
}

impl ConnectionRateLimits {
    pub fn new(max_events_per_second: u32, max_violations: u32) -> Self {
        Self {
            max_events_per_second,
            max_violations,
            events_this_second: 0,
            second_start: Instant::now(),
            violations: 0,
        }
    }

    /// Count one event received at `now`
    pub fn check_event(&mut self, now: Instant) -> Result<(), RateLimitViolation> {
        // Reset counter if a new second has started; halve the score per elapsed window
        let elapsed = now.saturating_duration_since(self.second_start);
        if elapsed >= Duration::from_secs(1) {
            let windows = elapsed.as_secs().min(31) as u32;
            self.violations >>= windows;
            self.second_start = now;
            self.events_this_second = 0;
        }

        self.events_this_second += 1;
        if self.events_this_second <= self.max_events_per_second {
            return Ok(());
        }

        self.violations += 1;
        if self.violations > self.max_violations {
            Err(RateLimitViolation::TooManyViolations(self.violations))
        } else {
            Err(RateLimitViolation::InputRateExceeded(self.events_this_second))
        }
    }

    /// Whether a violation should end the connection
    pub fn is_fatal(violation: &RateLimitViolation) -> bool {
        matches!(violation, RateLimitViolation::TooManyViolations(_))
    }
}

impl Default for ConnectionRateLimits {
    fn default() -> Self {
        use crate::game::constants::net;
        Self::new(net::MAX_EVENTS_PER_SECOND, net::MAX_RATE_VIOLATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_limit() {
        let mut limits = ConnectionRateLimits::new(10, 5);
        let now = Instant::now();
        for _ in 0..10 {
            assert!(limits.check_event(now).is_ok());
        }
        assert_eq!(limits.violations, 0);
    }

    #[test]
    fn test_over_limit_dropped() {
        let mut limits = ConnectionRateLimits::new(3, 5);
        let now = Instant::now();
        for _ in 0..3 {
            limits.check_event(now).unwrap();
        }
        assert_eq!(
            limits.check_event(now),
            Err(RateLimitViolation::InputRateExceeded(4))
        );
    }

    #[test]
    fn test_window_resets() {
        let mut limits = ConnectionRateLimits::new(2, 5);
        let start = limits.second_start;
        limits.check_event(start).unwrap();
        limits.check_event(start).unwrap();
        assert!(limits.check_event(start).is_err());

        let next = start + Duration::from_secs(1);
        assert!(limits.check_event(next).is_ok());
        assert_eq!(limits.events_this_second, 1);
    }

    #[test]
    fn test_persistent_abuse_is_fatal() {
        let mut limits = ConnectionRateLimits::new(1, 2);
        let now = limits.second_start;
        limits.check_event(now).unwrap();

        let first = limits.check_event(now).unwrap_err();
        let second = limits.check_event(now).unwrap_err();
        let third = limits.check_event(now).unwrap_err();

        assert!(!ConnectionRateLimits::is_fatal(&first));
        assert!(!ConnectionRateLimits::is_fatal(&second));
        assert!(ConnectionRateLimits::is_fatal(&third));
    }

    #[test]
    fn test_slightly_over_limit_is_never_fatal() {
        let mut limits = ConnectionRateLimits::default();
        let start = limits.second_start;
        for second in 0..120u64 {
            for event in 0..62u64 {
                let at = start
                    + Duration::from_secs(second)
                    + Duration::from_millis(event * 1000 / 62);
                if let Err(violation) = limits.check_event(at) {
                    assert!(
                        !ConnectionRateLimits::is_fatal(&violation),
                        "fatal at second {} event {}",
                        second,
                        event
                    );
                }
            }
        }
        assert!(limits.violations <= limits.max_violations);
    }

    #[test]
    fn test_sustained_flood_is_fatal() {
        let mut limits = ConnectionRateLimits::default();
        let start = limits.second_start;
        let mut fatal = false;
        'flood: for second in 0..5u64 {
            for event in 0..200u64 {
                let at = start
                    + Duration::from_secs(second)
                    + Duration::from_millis(event * 1000 / 200);
                if let Err(violation) = limits.check_event(at) {
                    if ConnectionRateLimits::is_fatal(&violation) {
                        fatal = true;
                        break 'flood;
                    }
                }
            }
        }
        assert!(fatal);
    }

    #[test]
    fn test_score_decays_across_windows() {
        let mut limits = ConnectionRateLimits::new(1, 100);
        let start = limits.second_start;
        for _ in 0..9 {
            let _ = limits.check_event(start);
        }
        assert_eq!(limits.violations, 8);

        let _ = limits.check_event(start + Duration::from_secs(1));
        assert_eq!(limits.violations, 4);

        let _ = limits.check_event(start + Duration::from_secs(4));
        assert_eq!(limits.violations, 0);
    }

    #[test]
    fn test_default_limits() {
        let limits = ConnectionRateLimits::default();
        assert_eq!(limits.max_events_per_second, 60);
        assert_eq!(limits.max_violations, 20);
    }
}
