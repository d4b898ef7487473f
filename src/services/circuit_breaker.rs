//! Circuit breaker decisions.
//!
//! Two states only: closed (executions flow) and open (handler excluded
//! from matching). The breaker opens after `threshold` consecutive
//! failures and allows a probe once `reset_seconds` have elapsed since the
//! last failure. The probe's outcome decides what happens next: success
//! closes the breaker, failure re-opens it for another window.
//!
//! These are pure functions over the handler's persisted breaker record;
//! the executor is responsible for writing the result back to the store.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::domain::models::{BreakerState, CircuitBreaker};

/// Whether the breaker currently blocks execution.
///
/// A disabled breaker never blocks, regardless of its recorded state.
pub fn is_open(breaker: &CircuitBreaker, now: DateTime<Utc>) -> bool {
    if !breaker.enabled || breaker.state == BreakerState::Closed {
        return false;
    }
    match breaker.last_error_time {
        Some(last_error) => {
            let reset_after = last_error + Duration::seconds(i64::from(breaker.reset_seconds));
            now < reset_after
        }
        // Open with no recorded failure time: let the probe through.
        None => false,
    }
}

/// Fold one execution result into the breaker record.
///
/// Returns the new state when a transition occurred, `None` otherwise.
pub fn apply_result(
    breaker: &mut CircuitBreaker,
    handler_id: &str,
    success: bool,
    now: DateTime<Utc>,
) -> Option<BreakerState> {
    if success {
        breaker.consecutive_failures = 0;
        if breaker.state == BreakerState::Open {
            breaker.state = BreakerState::Closed;
            info!(handler_id, "circuit breaker closed after successful probe");
            return Some(BreakerState::Closed);
        }
        return None;
    }

    breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
    breaker.last_error_time = Some(now);

    if breaker.enabled
        && breaker.state == BreakerState::Closed
        && breaker.consecutive_failures >= breaker.threshold
    {
        breaker.state = BreakerState::Open;
        warn!(
            handler_id,
            consecutive_failures = breaker.consecutive_failures,
            threshold = breaker.threshold,
            "circuit breaker opened"
        );
        return Some(BreakerState::Open);
    }

    // A failed probe re-arms the open window via last_error_time.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_seconds: u32) -> CircuitBreaker {
        CircuitBreaker {
            enabled: true,
            threshold,
            reset_seconds,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_error_time: None,
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut b = breaker(3, 300);
        let now = Utc::now();

        assert_eq!(apply_result(&mut b, "h", false, now), None);
        assert_eq!(apply_result(&mut b, "h", false, now), None);
        assert_eq!(
            apply_result(&mut b, "h", false, now),
            Some(BreakerState::Open)
        );
        assert!(is_open(&b, now));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut b = breaker(3, 300);
        let now = Utc::now();

        apply_result(&mut b, "h", false, now);
        apply_result(&mut b, "h", false, now);
        apply_result(&mut b, "h", true, now);
        assert_eq!(b.consecutive_failures, 0);

        // Two more failures stay below the threshold.
        apply_result(&mut b, "h", false, now);
        apply_result(&mut b, "h", false, now);
        assert_eq!(b.state, BreakerState::Closed);
    }

    #[test]
    fn test_probe_allowed_after_reset_window() {
        let mut b = breaker(1, 60);
        let opened_at = Utc::now();
        apply_result(&mut b, "h", false, opened_at);
        assert!(is_open(&b, opened_at + Duration::seconds(30)));
        assert!(!is_open(&b, opened_at + Duration::seconds(61)));
    }

    #[test]
    fn test_successful_probe_closes() {
        let mut b = breaker(1, 60);
        let now = Utc::now();
        apply_result(&mut b, "h", false, now);
        assert_eq!(b.state, BreakerState::Open);

        assert_eq!(
            apply_result(&mut b, "h", true, now + Duration::seconds(61)),
            Some(BreakerState::Closed)
        );
        assert!(!is_open(&b, now + Duration::seconds(62)));
    }

    #[test]
    fn test_failed_probe_rearms_window() {
        let mut b = breaker(1, 60);
        let now = Utc::now();
        apply_result(&mut b, "h", false, now);

        let probe_at = now + Duration::seconds(61);
        assert!(!is_open(&b, probe_at));
        apply_result(&mut b, "h", false, probe_at);

        // Still open; the window now runs from the probe failure.
        assert!(is_open(&b, probe_at + Duration::seconds(30)));
        assert!(!is_open(&b, probe_at + Duration::seconds(61)));
    }

    #[test]
    fn test_disabled_breaker_never_blocks() {
        let mut b = breaker(1, 300);
        b.enabled = false;
        let now = Utc::now();
        apply_result(&mut b, "h", false, now);
        assert_eq!(b.state, BreakerState::Closed);
        assert!(!is_open(&b, now));
    }
}
