//! Concurrent handler-action execution.
//!
//! Every matched handler runs as its own isolated unit: a spawned tokio
//! task that acquires a permit from a bounded semaphore before doing any
//! work. Dispatch never blocks the caller, units never observe each other,
//! and a unit failure is converted into a failed execution record rather
//! than propagated.
//!
//! Within a unit: rate counters are stamped first (an attempt counts even
//! if the action later fails), media is resolved to a deterministic path,
//! the action source is invoked under the handler's deadline, and the
//! resulting directives run strictly in order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use super::circuit_breaker;
use super::rate_limiter::RateLimiterService;
use crate::domain::error::EngineError;
use crate::domain::models::{
    ActionDirective, ExecutorConfig, Handler, HandlerAction, HandlerExecution, InboundEvent,
};
use crate::domain::ports::{HandlerStore, MessagingClient, ScriptRunner};

/// What the action source (script or static declaration) produced.
struct ActionSourceResult {
    success: bool,
    error: Option<String>,
    directives: Vec<ActionDirective>,
}

pub struct ActionExecutor {
    store: Arc<dyn HandlerStore>,
    messaging: Arc<dyn MessagingClient>,
    scripts: Arc<dyn ScriptRunner>,
    limiter: Arc<RateLimiterService>,
    permits: Arc<tokio::sync::Semaphore>,
    media_dir: PathBuf,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn HandlerStore>,
        messaging: Arc<dyn MessagingClient>,
        scripts: Arc<dyn ScriptRunner>,
        limiter: Arc<RateLimiterService>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            store,
            messaging,
            scripts,
            limiter,
            permits: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent.max(1))),
            media_dir: PathBuf::from(&config.media_dir),
        }
    }

    /// Fire-and-forget dispatch: one unit per matched handler. Permits are
    /// acquired inside the unit so the caller returns immediately even
    /// when the pool is saturated.
    pub fn dispatch(self: &Arc<Self>, handlers: Vec<Handler>, event: &InboundEvent) {
        for handler in handlers {
            let executor = Arc::clone(self);
            let event = event.clone();
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&executor.permits).acquire_owned().await else {
                    // Semaphore closed: engine shutting down.
                    return;
                };
                executor.execute(handler, &event).await;
            });
        }
    }

    /// Run one handler against one event to completion, persisting the
    /// execution record, stats, and breaker transition. Never fails: every
    /// error becomes a failed `HandlerExecution`.
    pub async fn execute(&self, handler: Handler, event: &InboundEvent) -> HandlerExecution {
        let started = Instant::now();
        let started_at = Utc::now();
        let handler_id = handler.handler_id.clone();
        debug!(handler_id = %handler_id, event_id = %event.message_id, "executing handler");

        // The attempt counts against the rate windows even if it fails.
        self.limiter.record(&handler_id, &event.sender_id);

        let mut context = event.context();
        if let Some(path) = self.resolve_media(event).await {
            context.insert("media_path".into(), path.display().to_string().into());
        }

        let source = self.invoke_action(&handler, &context).await;

        let mut actions_executed = 0u32;
        if source.success {
            for directive in &source.directives {
                match substitute_directive(directive, &context) {
                    Some(directive) => {
                        if self.run_directive(&directive, &handler_id).await {
                            actions_executed += 1;
                        }
                    }
                    None => {
                        warn!(
                            handler_id = %handler_id,
                            "directive dropped: substitution produced an invalid directive"
                        );
                    }
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = started.elapsed().as_millis() as i64;
        let execution = if source.success {
            info!(
                handler_id = %handler_id,
                event_id = %event.message_id,
                actions_executed,
                duration_ms,
                "handler executed"
            );
            HandlerExecution::success(&handler_id, event, started_at, duration_ms, actions_executed)
        } else {
            let reason = source
                .error
                .clone()
                .unwrap_or_else(|| "action failed".to_string());
            error!(
                handler_id = %handler_id,
                event_id = %event.message_id,
                error = %reason,
                "handler execution failed"
            );
            HandlerExecution::failure(&handler_id, event, started_at, duration_ms, reason)
        };

        self.persist_outcome(&handler, &execution).await;
        execution
    }

    /// Invoke the handler's action source and normalize the result.
    async fn invoke_action(&self, handler: &Handler, context: &Map<String, Value>) -> ActionSourceResult {
        match &handler.action {
            HandlerAction::Static { directives } => ActionSourceResult {
                success: true,
                error: None,
                directives: directives.clone(),
            },
            HandlerAction::Scripted { code } => {
                let timeout_seconds = handler.limits.timeout_seconds;
                let deadline = Duration::from_secs(u64::from(timeout_seconds));
                match tokio::time::timeout(
                    deadline,
                    self.scripts.run(code, context, timeout_seconds),
                )
                .await
                {
                    Err(_) => ActionSourceResult {
                        success: false,
                        error: Some(EngineError::Timeout { timeout_seconds }.to_string()),
                        directives: vec![],
                    },
                    Ok(Err(e)) => ActionSourceResult {
                        success: false,
                        error: Some(e.to_string()),
                        directives: vec![],
                    },
                    Ok(Ok(outcome)) => {
                        if outcome.success {
                            parse_script_result(outcome.output.as_ref())
                        } else {
                            ActionSourceResult {
                                success: false,
                                error: outcome.error,
                                directives: vec![],
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run one directive. Returns whether it counts as an executed action.
    /// Failures are logged and swallowed; they never fail the unit.
    async fn run_directive(&self, directive: &ActionDirective, handler_id: &str) -> bool {
        let result = match directive {
            ActionDirective::SendMessage { to, message } => {
                self.messaging
                    .invoke("send_message", json!({"to": to, "message": message}))
                    .await
            }
            ActionDirective::SendReaction { .. } => {
                // Reserved: accepted at registration, not executed yet.
                debug!(handler_id, "send_reaction directive ignored");
                return false;
            }
            ActionDirective::MarkRead {
                message_ids,
                chat,
                sender,
            } => {
                self.messaging
                    .invoke(
                        "mark_read",
                        json!({
                            "message_ids": message_ids,
                            "chat": chat,
                            "sender": sender,
                        }),
                    )
                    .await
            }
            ActionDirective::SendPresence { state } => {
                self.messaging
                    .invoke("send_presence", json!({"state": state}))
                    .await
            }
            ActionDirective::SendChatPresence { chat, state, media } => {
                self.messaging
                    .invoke(
                        "send_chat_presence",
                        json!({"chat": chat, "state": state, "media": media}),
                    )
                    .await
            }
            ActionDirective::Delay { seconds } => {
                if seconds.is_finite() && *seconds > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(*seconds)).await;
                }
                return true;
            }
            ActionDirective::CallMethod { method, params } => {
                self.messaging.invoke(method, params.clone()).await
            }
        };

        match result {
            Ok(outcome) if outcome.success => true,
            Ok(outcome) => {
                warn!(
                    handler_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "directive rejected by messaging backend"
                );
                false
            }
            Err(e) => {
                warn!(handler_id, error = %e, "directive failed");
                false
            }
        }
    }

    /// Resolve the event's media to a local file, if any.
    ///
    /// The path is deterministic per message so a second handler matching
    /// the same event reuses the already-downloaded file. Failures are
    /// logged and the unit continues without media.
    async fn resolve_media(&self, event: &InboundEvent) -> Option<PathBuf> {
        if !event.has_media() || event.raw_payload.is_none() {
            return None;
        }
        let path = self.media_dir.join(media_filename(event)?);
        if path.exists() {
            return Some(path);
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.media_dir).await {
            warn!(error = %e, "could not create media directory");
            return None;
        }
        match self.messaging.download_media(event, &path).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(
                    event_id = %event.message_id,
                    error = %e,
                    "media download failed, continuing without media"
                );
                None
            }
        }
    }

    /// Best-effort writes of the audit row, stats, and breaker. Store
    /// failures here are logged and swallowed.
    async fn persist_outcome(&self, handler: &Handler, execution: &HandlerExecution) {
        let handler_id = handler.handler_id.clone();

        if let Err(e) = self.store.append_execution(execution).await {
            warn!(handler_id = %handler_id, error = %e, "could not append execution record");
        }

        if let Err(e) = self
            .store
            .record_result(
                &handler_id,
                execution.success,
                execution.error.as_deref(),
                execution.completed_at,
            )
            .await
        {
            warn!(handler_id = %handler_id, error = %e, "could not update handler stats");
        }

        // Units run off a registry snapshot that may be arbitrarily stale;
        // re-read the persisted breaker record so failure counts accumulate
        // across units instead of restarting from the snapshot's value.
        let mut breaker = match self.store.get(&handler_id).await {
            Ok(Some(current)) => current.breaker,
            Ok(None) => {
                debug!(handler_id = %handler_id, "handler removed mid-flight, skipping breaker");
                return;
            }
            Err(e) => {
                warn!(handler_id = %handler_id, error = %e, "could not re-read breaker state");
                handler.breaker.clone()
            }
        };
        circuit_breaker::apply_result(&mut breaker, &handler_id, execution.success, Utc::now());
        if let Err(e) = self
            .store
            .set_breaker(
                &handler_id,
                breaker.state,
                breaker.consecutive_failures,
                breaker.last_error_time,
            )
            .await
        {
            warn!(handler_id = %handler_id, error = %e, "could not persist breaker state");
        }
    }
}

/// Deterministic media file name: `{message_id}_{media_type}{ext}`.
fn media_filename(event: &InboundEvent) -> Option<String> {
    let media_type = event.media_type.as_deref()?;
    let ext = match media_type {
        "image" => ".jpg",
        "video" => ".mp4",
        "audio" => ".ogg",
        _ => ".bin",
    };
    // Message ids are backend-assigned and may contain path separators.
    let safe_id: String = event
        .message_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    Some(format!("{safe_id}_{media_type}{ext}"))
}

/// Interpret a script's `output` value as an action result.
///
/// A JSON object is read as `{success?, error?, actions?}`; anything else
/// (including no output at all) is a plain success with no directives.
/// Individually malformed entries in `actions` are dropped with a warning.
fn parse_script_result(output: Option<&Value>) -> ActionSourceResult {
    let Some(Value::Object(obj)) = output else {
        return ActionSourceResult {
            success: true,
            error: None,
            directives: vec![],
        };
    };

    let success = obj.get("success").and_then(Value::as_bool).unwrap_or(true);
    let error = obj
        .get("error")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let mut directives = Vec::new();
    if let Some(Value::Array(actions)) = obj.get("actions") {
        for action in actions {
            match serde_json::from_value::<ActionDirective>(action.clone()) {
                Ok(directive) => directives.push(directive),
                Err(e) => warn!(error = %e, "dropping malformed action from script output"),
            }
        }
    }

    ActionSourceResult {
        success,
        error,
        directives,
    }
}

/// Replace whole-value `"{event.<field>}"` strings with the context value,
/// recursing through objects and arrays. Partial interpolation and unknown
/// fields are left untouched.
fn substitute_value(value: &Value, context: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(field) = s.strip_prefix("{event.").and_then(|r| r.strip_suffix('}')) {
                if let Some(replacement) = context.get(field) {
                    return replacement.clone();
                }
            }
            value.clone()
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| substitute_value(v, context)).collect(),
        ),
        _ => value.clone(),
    }
}

/// Apply variable substitution to a directive via its JSON form. Returns
/// `None` when substitution yields a value that no longer parses as a
/// directive (e.g. a non-string substituted into a string field).
fn substitute_directive(
    directive: &ActionDirective,
    context: &Map<String, Value>,
) -> Option<ActionDirective> {
    let raw = serde_json::to_value(directive).ok()?;
    serde_json::from_value(substitute_value(&raw, context)).ok()
}
