//! Shared test fixtures: in-memory store setup and mock capability ports.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use chathooks::adapters::sqlite::{create_test_pool, SqliteHandlerStore};
use chathooks::domain::models::{EventFilter, HandlerAction, HandlerRequest, InboundEvent};
use chathooks::{EngineError, MessagingClient, MethodResult, ScriptOutcome, ScriptRunner};

pub async fn setup_store() -> SqliteHandlerStore {
    let pool = create_test_pool().await.expect("failed to create test pool");
    SqliteHandlerStore::init_schema(&pool)
        .await
        .expect("failed to init schema");
    SqliteHandlerStore::new(pool)
}

/// Messaging mock that records every invocation.
pub struct MockMessaging {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub reject: AtomicBool,
    pub downloads: Mutex<Vec<String>>,
}

impl MockMessaging {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            downloads: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingClient for MockMessaging {
    async fn invoke(&self, method: &str, params: Value) -> Result<MethodResult, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if self.reject.load(Ordering::SeqCst) {
            Ok(MethodResult::failed("backend rejected"))
        } else {
            Ok(MethodResult::ok())
        }
    }

    async fn download_media(&self, _event: &InboundEvent, dest: &Path) -> Result<(), EngineError> {
        self.downloads
            .lock()
            .unwrap()
            .push(dest.display().to_string());
        tokio::fs::write(dest, b"media-bytes")
            .await
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        Ok(())
    }
}

/// Script runner mock returning a canned outcome, optionally after a delay.
pub struct MockScripts {
    pub outcome: Mutex<ScriptOutcome>,
    pub delay: Mutex<Option<Duration>>,
    pub contexts: Mutex<Vec<Map<String, Value>>>,
}

impl MockScripts {
    pub fn succeeding(output: Option<Value>) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(ScriptOutcome {
                success: true,
                error: None,
                output,
            }),
            delay: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(ScriptOutcome {
                success: false,
                error: Some(error.to_string()),
                output: None,
            }),
            delay: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ScriptRunner for MockScripts {
    async fn run(
        &self,
        _code: &str,
        event_context: &Map<String, Value>,
        _timeout_seconds: u32,
    ) -> Result<ScriptOutcome, EngineError> {
        self.contexts.lock().unwrap().push(event_context.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.outcome.lock().unwrap().clone())
    }
}

pub fn request(id: &str, action: HandlerAction) -> HandlerRequest {
    HandlerRequest {
        handler_id: id.to_string(),
        description: None,
        event_filter: EventFilter::default(),
        action,
        enabled: true,
        priority: 0,
        max_per_minute: None,
        max_per_hour: None,
        max_per_sender_per_hour: None,
        cooldown_seconds: 0,
        timeout_seconds: 30,
        circuit_breaker_enabled: true,
        circuit_breaker_threshold: 5,
        circuit_breaker_reset_seconds: 300,
    }
}

pub fn text_event(id: &str, sender: &str, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: id.to_string(),
        chat_id: "chat-1".to_string(),
        sender_id: sender.to_string(),
        text_content: Some(text.to_string()),
        ..Default::default()
    }
}
