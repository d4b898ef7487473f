//! Fixed-window execution rate limiting.
//!
//! Three independent windows per handler: per-minute, per-hour, and
//! per-sender-per-hour, each a fixed bucket keyed by integer division of
//! the epoch timestamp (minute = `secs / 60`, hour = `secs / 3600`). A
//! window boundary therefore fully resets the count; the limiter makes no
//! attempt at sliding-window smoothing.
//!
//! Counters are in-memory only and reset on restart. Checking and
//! recording are separate steps: the matcher checks, the executor records
//! once a unit is actually dispatched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::models::Handler;

/// Buckets older than this are evicted on record.
const EVICT_AFTER_HOURS: i64 = 2;

#[derive(Debug, Default)]
struct HandlerWindow {
    per_minute: HashMap<i64, u32>,
    per_hour: HashMap<i64, u32>,
    per_sender_hour: HashMap<(String, i64), u32>,
    last_execution: Option<DateTime<Utc>>,
}

/// Per-handler execution counters with fixed-window semantics.
///
/// The outer map is guarded by a coarse mutex held only to fetch or insert
/// the per-handler entry; per-handler state has its own lock so unrelated
/// handlers never contend.
#[derive(Debug, Default)]
pub struct RateLimiterService {
    handlers: Mutex<HashMap<String, Arc<Mutex<HandlerWindow>>>>,
}

impl RateLimiterService {
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, handler_id: &str) -> Arc<Mutex<HandlerWindow>> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(handlers.entry(handler_id.to_string()).or_default())
    }

    /// Whether an execution now would stay within every configured limit.
    /// Handlers with no limits configured always pass.
    pub fn check(&self, handler: &Handler, sender_id: &str) -> bool {
        self.check_at(handler, sender_id, Utc::now())
    }

    pub fn check_at(&self, handler: &Handler, sender_id: &str, now: DateTime<Utc>) -> bool {
        let limits = &handler.limits;
        if limits.max_per_minute.is_none()
            && limits.max_per_hour.is_none()
            && limits.max_per_sender_per_hour.is_none()
        {
            return true;
        }

        let minute = now.timestamp() / 60;
        let hour = now.timestamp() / 3600;

        let window = self.window(&handler.handler_id);
        let window = window.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(max) = limits.max_per_minute {
            let count = window.per_minute.get(&minute).copied().unwrap_or(0);
            if count >= max {
                debug!(
                    handler_id = %handler.handler_id,
                    count, max, "per-minute rate limit reached"
                );
                return false;
            }
        }

        if let Some(max) = limits.max_per_hour {
            let count = window.per_hour.get(&hour).copied().unwrap_or(0);
            if count >= max {
                debug!(
                    handler_id = %handler.handler_id,
                    count, max, "per-hour rate limit reached"
                );
                return false;
            }
        }

        if let Some(max) = limits.max_per_sender_per_hour {
            let key = (sender_id.to_string(), hour);
            let count = window.per_sender_hour.get(&key).copied().unwrap_or(0);
            if count >= max {
                debug!(
                    handler_id = %handler.handler_id,
                    sender_id, count, max, "per-sender rate limit reached"
                );
                return false;
            }
        }

        true
    }

    /// Whether the handler's cooldown has elapsed. A cooldown of 0 always
    /// passes, as does a handler that has never executed.
    pub fn check_cooldown(&self, handler: &Handler) -> bool {
        self.check_cooldown_at(handler, Utc::now())
    }

    pub fn check_cooldown_at(&self, handler: &Handler, now: DateTime<Utc>) -> bool {
        if handler.limits.cooldown_seconds == 0 {
            return true;
        }
        let window = self.window(&handler.handler_id);
        let window = window.lock().unwrap_or_else(|e| e.into_inner());
        match window.last_execution {
            Some(last) => {
                let ready_at = last + Duration::seconds(i64::from(handler.limits.cooldown_seconds));
                if now < ready_at {
                    debug!(handler_id = %handler.handler_id, "cooldown active");
                    false
                } else {
                    true
                }
            }
            None => true,
        }
    }

    /// Count one execution against every window and start the cooldown
    /// clock. Also evicts buckets older than two hours.
    pub fn record(&self, handler_id: &str, sender_id: &str) {
        self.record_at(handler_id, sender_id, Utc::now());
    }

    pub fn record_at(&self, handler_id: &str, sender_id: &str, now: DateTime<Utc>) {
        let minute = now.timestamp() / 60;
        let hour = now.timestamp() / 3600;

        let window = self.window(handler_id);
        let mut window = window.lock().unwrap_or_else(|e| e.into_inner());

        *window.per_minute.entry(minute).or_insert(0) += 1;
        *window.per_hour.entry(hour).or_insert(0) += 1;
        *window
            .per_sender_hour
            .entry((sender_id.to_string(), hour))
            .or_insert(0) += 1;
        window.last_execution = Some(now);

        let min_minute = minute - EVICT_AFTER_HOURS * 60;
        let min_hour = hour - EVICT_AFTER_HOURS;
        window.per_minute.retain(|&m, _| m >= min_minute);
        window.per_hour.retain(|&h, _| h >= min_hour);
        window.per_sender_hour.retain(|(_, h), _| *h >= min_hour);
    }

    /// Drop all state for a deleted handler.
    pub fn remove(&self, handler_id: &str) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.remove(handler_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventFilter, HandlerAction, HandlerRequest};
    use chrono::TimeZone;

    fn handler_with_limits(
        per_minute: Option<u32>,
        per_hour: Option<u32>,
        per_sender: Option<u32>,
        cooldown: u32,
    ) -> Handler {
        HandlerRequest {
            handler_id: "h1".to_string(),
            description: None,
            event_filter: EventFilter::default(),
            action: HandlerAction::Static { directives: vec![] },
            enabled: true,
            priority: 0,
            max_per_minute: per_minute,
            max_per_hour: per_hour,
            max_per_sender_per_hour: per_sender,
            cooldown_seconds: cooldown,
            timeout_seconds: 30,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_seconds: 300,
        }
        .into_handler()
        .unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_unlimited_handler_always_passes() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(None, None, None, 0);
        for _ in 0..100 {
            assert!(limiter.check_at(&handler, "a", at(1_000_000)));
            limiter.record_at("h1", "a", at(1_000_000));
        }
    }

    #[test]
    fn test_per_minute_limit_and_window_reset() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(Some(2), None, None, 0);
        let t = at(1_000_000 * 60); // exact minute boundary

        assert!(limiter.check_at(&handler, "a", t));
        limiter.record_at("h1", "a", t);
        assert!(limiter.check_at(&handler, "a", t));
        limiter.record_at("h1", "a", t);
        assert!(!limiter.check_at(&handler, "a", t));

        // Next minute bucket resets the count.
        assert!(limiter.check_at(&handler, "a", t + Duration::seconds(60)));
    }

    #[test]
    fn test_per_sender_limit_is_per_sender() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(None, None, Some(1), 0);
        let t = at(7_200_000);

        limiter.record_at("h1", "alice", t);
        assert!(!limiter.check_at(&handler, "alice", t));
        assert!(limiter.check_at(&handler, "bob", t));
    }

    #[test]
    fn test_hour_limit_spans_minutes() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(None, Some(2), None, 0);
        let t = at(3_600 * 500);

        limiter.record_at("h1", "a", t);
        limiter.record_at("h1", "a", t + Duration::seconds(120));
        assert!(!limiter.check_at(&handler, "a", t + Duration::seconds(240)));
        assert!(limiter.check_at(&handler, "a", t + Duration::seconds(3600)));
    }

    #[test]
    fn test_cooldown() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(None, None, None, 30);
        let t = at(1_000_000);

        // Never executed: passes.
        assert!(limiter.check_cooldown_at(&handler, t));
        limiter.record_at("h1", "a", t);

        assert!(!limiter.check_cooldown_at(&handler, t + Duration::seconds(29)));
        assert!(limiter.check_cooldown_at(&handler, t + Duration::seconds(30)));
    }

    #[test]
    fn test_eviction_drops_stale_buckets() {
        let limiter = RateLimiterService::new();
        let t = at(3_600 * 100);
        limiter.record_at("h1", "a", t);
        limiter.record_at("h1", "a", t + Duration::hours(3));

        let window = limiter.window("h1");
        let window = window.lock().unwrap();
        assert_eq!(window.per_hour.len(), 1);
        assert_eq!(window.per_sender_hour.len(), 1);
    }

    #[test]
    fn test_remove_clears_state() {
        let limiter = RateLimiterService::new();
        let handler = handler_with_limits(Some(1), None, None, 0);
        let t = at(1_000_000);

        limiter.record_at("h1", "a", t);
        assert!(!limiter.check_at(&handler, "a", t));
        limiter.remove("h1");
        assert!(limiter.check_at(&handler, "a", t));
    }
}
