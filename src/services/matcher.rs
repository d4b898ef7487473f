//! Event-to-handler matching.
//!
//! For each inbound event the matcher walks the registry snapshot and
//! admits handlers through a fixed chain of checks: enabled, breaker,
//! rate limits, cooldown, and finally the event filter. The cheap state
//! checks run before filter evaluation so a throttled handler never pays
//! for regex matching. Survivors come back sorted by priority descending,
//! ties broken by `handler_id` ascending.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::circuit_breaker;
use super::rate_limiter::RateLimiterService;
use super::registry::HandlerRegistry;
use crate::domain::models::{Handler, InboundEvent};

pub struct EventMatcher {
    registry: Arc<HandlerRegistry>,
    limiter: Arc<RateLimiterService>,
}

impl EventMatcher {
    pub fn new(registry: Arc<HandlerRegistry>, limiter: Arc<RateLimiterService>) -> Self {
        Self { registry, limiter }
    }

    /// Handlers that should run for this event, in execution order.
    pub fn match_event(&self, event: &InboundEvent) -> Vec<Handler> {
        self.match_event_at(event, Utc::now())
    }

    pub fn match_event_at(&self, event: &InboundEvent, now: DateTime<Utc>) -> Vec<Handler> {
        let snapshot = self.registry.snapshot();
        let mut matched: Vec<Handler> = snapshot
            .iter()
            .filter(|handler| admit(&self.limiter, handler, event, now))
            .cloned()
            .collect();
        sort_matches(&mut matched);

        if !matched.is_empty() {
            debug!(
                event_id = %event.message_id,
                matched = matched.len(),
                "event matched handlers"
            );
        }
        matched
    }
}

/// The admission chain for one handler. Order matters: state checks run
/// before the filter so throttled handlers never pay for regex matching.
fn admit(
    limiter: &RateLimiterService,
    handler: &Handler,
    event: &InboundEvent,
    now: DateTime<Utc>,
) -> bool {
    if !handler.enabled {
        return false;
    }
    if circuit_breaker::is_open(&handler.breaker, now) {
        debug!(handler_id = %handler.handler_id, "skipped: circuit breaker open");
        return false;
    }
    if !limiter.check_at(handler, &event.sender_id, now) {
        return false;
    }
    if !limiter.check_cooldown_at(handler, now) {
        return false;
    }
    handler.event_filter.matches(event)
}

/// Stable sort by `(priority desc, handler_id asc)`.
fn sort_matches(handlers: &mut [Handler]) {
    handlers.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.handler_id.cmp(&b.handler_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BreakerState, EventFilter, HandlerAction, HandlerRequest};
    use chrono::Duration;

    fn handler(id: &str, priority: i32) -> Handler {
        HandlerRequest {
            handler_id: id.to_string(),
            description: None,
            event_filter: EventFilter::default(),
            action: HandlerAction::Static { directives: vec![] },
            enabled: true,
            priority,
            max_per_minute: None,
            max_per_hour: None,
            max_per_sender_per_hour: None,
            cooldown_seconds: 0,
            timeout_seconds: 30,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_seconds: 300,
        }
        .into_handler()
        .unwrap()
    }

    #[test]
    fn test_sort_priority_then_id() {
        let mut handlers = vec![handler("b", 5), handler("a", 5), handler("c", 10)];
        sort_matches(&mut handlers);
        let ids: Vec<&str> = handlers.iter().map(|h| h.handler_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_disabled_handler_not_admitted() {
        let limiter = RateLimiterService::new();
        let mut h = handler("h", 0);
        h.enabled = false;
        assert!(!admit(&limiter, &h, &InboundEvent::default(), Utc::now()));
    }

    #[test]
    fn test_open_breaker_blocks_admission() {
        let limiter = RateLimiterService::new();
        let now = Utc::now();
        let mut h = handler("h", 0);
        h.breaker.state = BreakerState::Open;
        h.breaker.last_error_time = Some(now);
        assert!(!admit(&limiter, &h, &InboundEvent::default(), now));

        // Reset window elapsed: probe admitted.
        assert!(admit(
            &limiter,
            &h,
            &InboundEvent::default(),
            now + Duration::seconds(301)
        ));
    }

    #[test]
    fn test_rate_limited_handler_not_admitted() {
        let limiter = RateLimiterService::new();
        let now = Utc::now();
        let mut h = handler("h", 0);
        h.limits.max_per_minute = Some(1);

        let event = InboundEvent::default();
        assert!(admit(&limiter, &h, &event, now));
        limiter.record_at("h", &event.sender_id, now);
        assert!(!admit(&limiter, &h, &event, now));
    }

    #[test]
    fn test_cooldown_blocks_admission() {
        let limiter = RateLimiterService::new();
        let now = Utc::now();
        let mut h = handler("h", 0);
        h.limits.cooldown_seconds = 60;

        let event = InboundEvent::default();
        limiter.record_at("h", &event.sender_id, now);
        assert!(!admit(&limiter, &h, &event, now + Duration::seconds(10)));
        assert!(admit(&limiter, &h, &event, now + Duration::seconds(61)));
    }

    #[test]
    fn test_filter_checked_last() {
        let limiter = RateLimiterService::new();
        let mut h = handler("h", 0);
        h.event_filter.text_contains = Some(vec!["ping".to_string()]);

        let mut event = InboundEvent::default();
        assert!(!admit(&limiter, &h, &event, Utc::now()));
        event.text_content = Some("ping me".to_string());
        assert!(admit(&limiter, &h, &event, Utc::now()));
    }
}
