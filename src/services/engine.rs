//! Top-level wiring: one `EventEngine` per messaging session.
//!
//! The engine owns the registry, limiter, matcher, and executor and exposes
//! the two entry points the embedding application needs: handler CRUD (via
//! `registry()`) and `handle_event` for the inbound stream.

use std::sync::Arc;

use tracing::debug;

use super::executor::ActionExecutor;
use super::matcher::EventMatcher;
use super::rate_limiter::RateLimiterService;
use super::registry::HandlerRegistry;
use crate::domain::error::EngineError;
use crate::domain::models::{ExecutorConfig, InboundEvent};
use crate::domain::ports::{HandlerStore, MessagingClient, ScriptRunner};

pub struct EventEngine {
    registry: Arc<HandlerRegistry>,
    matcher: EventMatcher,
    executor: Arc<ActionExecutor>,
}

impl EventEngine {
    pub fn new(
        store: Arc<dyn HandlerStore>,
        messaging: Arc<dyn MessagingClient>,
        scripts: Arc<dyn ScriptRunner>,
        config: &ExecutorConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiterService::new());
        let registry = Arc::new(HandlerRegistry::new(Arc::clone(&store)));
        let matcher = EventMatcher::new(Arc::clone(&registry), Arc::clone(&limiter));
        let executor = Arc::new(ActionExecutor::new(
            store, messaging, scripts, limiter, config,
        ));
        Self {
            registry,
            matcher,
            executor,
        }
    }

    /// Load the handler snapshot from the store. Call once at startup and
    /// after any registry mutation that should go live.
    pub async fn load(&self) -> Result<usize, EngineError> {
        self.registry.load().await
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Match and dispatch one inbound event. Returns immediately; matched
    /// handlers run as detached bounded-concurrency units.
    pub fn handle_event(&self, event: &InboundEvent) {
        let matched = self.matcher.match_event(event);
        if matched.is_empty() {
            debug!(event_id = %event.message_id, "no handlers matched");
            return;
        }
        self.executor.dispatch(matched, event);
    }
}
