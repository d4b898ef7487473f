//! Handler definitions: event filters, actions, limits, and breaker state.
//!
//! A handler pairs a declarative predicate over inbound events with an
//! action to run when the predicate matches. Handlers are validated on
//! ingestion; the matching and execution paths only ever see well-formed
//! records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::InboundEvent;
use crate::domain::error::EngineError;

/// Predicate clauses evaluated against an inbound event.
///
/// An absent clause is a wildcard. Present clauses are ANDed; list-valued
/// clauses are membership tests (ORed internally).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_ids: Option<Vec<String>>,
    /// Chat membership restricted to group chats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_from_me: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_media: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_quoted_message: Option<bool>,
    /// Case-insensitive substring match of any listed keyword.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_contains: Option<Vec<String>>,
    /// Unanchored regular expression over `text_content`. A malformed
    /// pattern never matches; it is not an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,
}

impl EventFilter {
    /// Check whether an event satisfies every present clause.
    pub fn matches(&self, event: &InboundEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.is_empty() && !types.iter().any(|t| *t == event.event_type) {
                return false;
            }
        }

        if let Some(is_from_me) = self.is_from_me {
            if is_from_me != event.is_from_me {
                return false;
            }
        }

        if let Some(types) = &self.message_types {
            if !types.is_empty() && !types.iter().any(|t| *t == event.message_type) {
                return false;
            }
        }

        if let Some(from_ids) = &self.from_ids {
            if !from_ids.is_empty() && !from_ids.iter().any(|f| *f == event.sender_id) {
                return false;
            }
        }

        if let Some(chat_ids) = &self.chat_ids {
            if !chat_ids.is_empty() && !chat_ids.iter().any(|c| *c == event.chat_id) {
                return false;
            }
        }

        if let Some(is_group) = self.is_group {
            if is_group != event.is_group {
                return false;
            }
        }

        if let Some(group_ids) = &self.group_ids {
            if !group_ids.is_empty()
                && (!event.is_group || !group_ids.iter().any(|g| *g == event.chat_id))
            {
                return false;
            }
        }

        if let Some(has_media) = self.has_media {
            if has_media != event.has_media() {
                return false;
            }
        }

        if let Some(has_quoted) = self.has_quoted_message {
            if has_quoted != event.has_quoted_message() {
                return false;
            }
        }

        if let Some(keywords) = &self.text_contains {
            if !keywords.is_empty() {
                let text = event
                    .text_content
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase();
                if !keywords.iter().any(|k| text.contains(&k.to_lowercase())) {
                    return false;
                }
            }
        }

        if let Some(pattern) = &self.text_regex {
            if !pattern.is_empty() {
                let text = event.text_content.as_deref().unwrap_or_default();
                match regex::Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(text) {
                            return false;
                        }
                    }
                    // Malformed pattern: treated as "no match", never surfaced.
                    Err(_) => return false,
                }
            }
        }

        true
    }
}

/// One executable step produced by a handler's action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDirective {
    SendMessage {
        to: String,
        message: Value,
    },
    /// Reserved; accepted but not executed yet.
    SendReaction {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        emoji: Option<String>,
    },
    MarkRead {
        message_ids: Vec<Value>,
        #[serde(default)]
        chat: Option<String>,
        #[serde(default)]
        sender: Option<String>,
    },
    SendPresence {
        state: String,
    },
    SendChatPresence {
        chat: String,
        state: String,
        #[serde(default)]
        media: Option<String>,
    },
    /// Blocking pause local to the executing unit.
    Delay {
        seconds: f64,
    },
    /// Escape hatch: arbitrary named capability invocation.
    CallMethod {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// What a handler does when it matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerAction {
    /// Run operator-supplied code via the script capability; the script
    /// returns the directive list to execute.
    Scripted { code: String },
    /// Execute a pre-declared directive list directly.
    Static { directives: Vec<ActionDirective> },
}

/// Execution-frequency guards for a handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_per_sender_per_hour: Option<u32>,
    /// Minimum seconds between consecutive executions. 0 disables.
    pub cooldown_seconds: u32,
    /// Deadline for the scripted-action call.
    pub timeout_seconds: u32,
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Executions flow normally.
    Closed,
    /// Repeated failures; handler excluded from matching until the reset
    /// window elapses.
    Open,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

impl std::str::FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            other => Err(format!("unknown breaker state: {other}")),
        }
    }
}

/// Declarative breaker policy plus mutable runtime status.
///
/// The policy fields are operator configuration; `state`,
/// `consecutive_failures`, and `last_error_time` are written back to the
/// store after every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub enabled: bool,
    /// Consecutive failures required to open the breaker.
    pub threshold: u32,
    /// Seconds the breaker stays open before allowing a probe.
    pub reset_seconds: u32,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_breaker_threshold(),
            reset_seconds: default_breaker_reset_seconds(),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_error_time: None,
        }
    }
}

/// Cumulative execution statistics, persisted best-effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerStats {
    pub execution_count: u64,
    pub total_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A registered handler: filter, action, guards, and runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handler {
    /// Sole identity; unique, operator-chosen.
    pub handler_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    /// Higher runs first; ties break on `handler_id` ascending.
    pub priority: i32,
    pub event_filter: EventFilter,
    pub action: HandlerAction,
    pub limits: ExecutionLimits,
    pub breaker: CircuitBreaker,
    pub stats: HandlerStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-submitted registration request. Missing optional fields take
/// the documented defaults; required fields are validated before anything
/// touches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRequest {
    pub handler_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_filter: EventFilter,
    pub action: HandlerAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_per_minute: Option<u32>,
    #[serde(default)]
    pub max_per_hour: Option<u32>,
    #[serde(default)]
    pub max_per_sender_per_hour: Option<u32>,
    #[serde(default)]
    pub cooldown_seconds: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    #[serde(default = "default_enabled")]
    pub circuit_breaker_enabled: bool,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_breaker_reset_seconds")]
    pub circuit_breaker_reset_seconds: u32,
}

/// Partial update for an existing handler. Absent fields keep their
/// current values; limits cannot be cleared through a patch, only changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerPatch {
    pub description: Option<String>,
    pub event_filter: Option<EventFilter>,
    pub action: Option<HandlerAction>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub max_per_minute: Option<u32>,
    pub max_per_hour: Option<u32>,
    pub max_per_sender_per_hour: Option<u32>,
    pub cooldown_seconds: Option<u32>,
    pub timeout_seconds: Option<u32>,
    pub circuit_breaker_enabled: Option<bool>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_reset_seconds: Option<u32>,
}

impl HandlerPatch {
    /// Merge the present fields into `handler`, leaving the rest intact.
    pub fn apply_to(self, handler: &mut Handler) {
        if self.description.is_some() {
            handler.description = self.description;
        }
        if let Some(filter) = self.event_filter {
            handler.event_filter = filter;
        }
        if let Some(action) = self.action {
            handler.action = action;
        }
        if let Some(enabled) = self.enabled {
            handler.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            handler.priority = priority;
        }
        if let Some(max) = self.max_per_minute {
            handler.limits.max_per_minute = Some(max);
        }
        if let Some(max) = self.max_per_hour {
            handler.limits.max_per_hour = Some(max);
        }
        if let Some(max) = self.max_per_sender_per_hour {
            handler.limits.max_per_sender_per_hour = Some(max);
        }
        if let Some(cooldown) = self.cooldown_seconds {
            handler.limits.cooldown_seconds = cooldown;
        }
        if let Some(timeout) = self.timeout_seconds {
            handler.limits.timeout_seconds = timeout;
        }
        if let Some(enabled) = self.circuit_breaker_enabled {
            handler.breaker.enabled = enabled;
        }
        if let Some(threshold) = self.circuit_breaker_threshold {
            handler.breaker.threshold = threshold;
        }
        if let Some(reset) = self.circuit_breaker_reset_seconds {
            handler.breaker.reset_seconds = reset;
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_timeout_seconds() -> u32 {
    30
}

const fn default_breaker_threshold() -> u32 {
    5
}

const fn default_breaker_reset_seconds() -> u32 {
    300
}

impl HandlerRequest {
    /// Validate the request and build a fresh handler record.
    pub fn into_handler(self) -> Result<Handler, EngineError> {
        if self.handler_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "handler_id must be a non-empty string".to_string(),
            ));
        }
        if let HandlerAction::Scripted { code } = &self.action {
            if code.trim().is_empty() {
                return Err(EngineError::Validation(
                    "scripted action requires non-empty code".to_string(),
                ));
            }
        }

        let now = Utc::now();
        Ok(Handler {
            handler_id: self.handler_id,
            description: self.description,
            enabled: self.enabled,
            priority: self.priority,
            event_filter: self.event_filter,
            action: self.action,
            limits: ExecutionLimits {
                max_per_minute: self.max_per_minute,
                max_per_hour: self.max_per_hour,
                max_per_sender_per_hour: self.max_per_sender_per_hour,
                cooldown_seconds: self.cooldown_seconds,
                timeout_seconds: self.timeout_seconds,
            },
            breaker: CircuitBreaker {
                enabled: self.circuit_breaker_enabled,
                threshold: self.circuit_breaker_threshold,
                reset_seconds: self.circuit_breaker_reset_seconds,
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_error_time: None,
            },
            stats: HandlerStats::default(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(text: &str) -> InboundEvent {
        InboundEvent {
            event_type: "message".to_string(),
            message_id: "m1".to_string(),
            chat_id: "chat-1".to_string(),
            sender_id: "alice@example.net".to_string(),
            text_content: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&text_event("anything")));
    }

    #[test]
    fn test_event_type_membership() {
        let filter = EventFilter {
            event_types: Some(vec!["presence".to_string(), "message".to_string()]),
            ..Default::default()
        };
        assert!(filter.matches(&text_event("hi")));

        let filter = EventFilter {
            event_types: Some(vec!["presence".to_string()]),
            ..Default::default()
        };
        assert!(!filter.matches(&text_event("hi")));
    }

    #[test]
    fn test_is_from_me_equality() {
        let filter = EventFilter {
            is_from_me: Some(true),
            ..Default::default()
        };
        assert!(!filter.matches(&text_event("hi")));

        let mut event = text_event("hi");
        event.is_from_me = true;
        assert!(filter.matches(&event));
    }

    #[test]
    fn test_group_ids_requires_group() {
        let filter = EventFilter {
            group_ids: Some(vec!["chat-1".to_string()]),
            ..Default::default()
        };

        // Right chat, but not a group chat.
        assert!(!filter.matches(&text_event("hi")));

        let mut event = text_event("hi");
        event.is_group = true;
        assert!(filter.matches(&event));

        event.chat_id = "chat-2".to_string();
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_text_contains_case_insensitive() {
        let filter = EventFilter {
            text_contains: Some(vec!["HELLO".to_string()]),
            ..Default::default()
        };
        assert!(filter.matches(&text_event("well hello there")));
        assert!(!filter.matches(&text_event("goodbye")));
    }

    #[test]
    fn test_text_regex_unanchored() {
        let filter = EventFilter {
            text_regex: Some(r"order #\d+".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&text_event("re: order #123 status")));
        assert!(!filter.matches(&text_event("no order number")));
    }

    #[test]
    fn test_malformed_regex_never_matches() {
        let filter = EventFilter {
            text_regex: Some("(unclosed".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&text_event("(unclosed")));
    }

    #[test]
    fn test_has_media_clause() {
        let filter = EventFilter {
            has_media: Some(true),
            ..Default::default()
        };
        assert!(!filter.matches(&text_event("hi")));

        let mut event = text_event("hi");
        event.media_type = Some("image".to_string());
        assert!(filter.matches(&event));

        // Explicitly requiring no media.
        let filter = EventFilter {
            has_media: Some(false),
            ..Default::default()
        };
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_clauses_are_anded() {
        let filter = EventFilter {
            event_types: Some(vec!["message".to_string()]),
            text_contains: Some(vec!["hello".to_string()]),
            is_from_me: Some(false),
            ..Default::default()
        };
        assert!(filter.matches(&text_event("hello there")));

        let mut event = text_event("hello there");
        event.is_from_me = true;
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_request_defaults() {
        let json = serde_json::json!({
            "handler_id": "greeter",
            "event_filter": {},
            "action": {"type": "static", "directives": []}
        });
        let request: HandlerRequest = serde_json::from_value(json).unwrap();
        assert!(request.enabled);
        assert_eq!(request.priority, 0);
        assert_eq!(request.timeout_seconds, 30);
        assert_eq!(request.cooldown_seconds, 0);
        assert!(request.circuit_breaker_enabled);
        assert_eq!(request.circuit_breaker_threshold, 5);
        assert_eq!(request.circuit_breaker_reset_seconds, 300);

        let handler = request.into_handler().unwrap();
        assert_eq!(handler.breaker.state, BreakerState::Closed);
        assert_eq!(handler.stats.execution_count, 0);
    }

    #[test]
    fn test_request_rejects_empty_handler_id() {
        let request = HandlerRequest {
            handler_id: "  ".to_string(),
            description: None,
            event_filter: EventFilter::default(),
            action: HandlerAction::Static { directives: vec![] },
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
        };
        assert!(matches!(
            request.into_handler(),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_directive_deserialization() {
        let json = serde_json::json!({
            "type": "send_message",
            "to": "{event.from}",
            "message": {"conversation": "hi!"}
        });
        let directive: ActionDirective = serde_json::from_value(json).unwrap();
        assert!(matches!(directive, ActionDirective::SendMessage { .. }));

        let json = serde_json::json!({"type": "delay", "seconds": 1.5});
        let directive: ActionDirective = serde_json::from_value(json).unwrap();
        assert!(matches!(directive, ActionDirective::Delay { .. }));
    }

    #[test]
    fn test_action_tagged_serialization() {
        let action = HandlerAction::Scripted {
            code: "result = {'success': True}".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "scripted");

        let action = HandlerAction::Static { directives: vec![] };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "static");
    }
}
