//! Inbound messaging events.
//!
//! One `InboundEvent` is produced per occurrence on the messaging backend
//! (message arrival, presence change, receipt). Events are ephemeral: they
//! exist only for the duration of matching and execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single inbound event from the messaging backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Kind of occurrence, e.g. "message", "presence", "receipt".
    pub event_type: String,
    /// Backend-assigned message identifier (doubles as the event id).
    pub message_id: String,
    /// Chat the event belongs to.
    pub chat_id: String,
    /// Sender of the message.
    pub sender_id: String,
    /// Display name of the sender, if the backend provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub is_group: bool,
    pub is_from_me: bool,
    /// Message kind, e.g. "text", "image", "audio".
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<String>,
    /// Opaque raw payload from the backend. Never interpreted by the engine;
    /// handed back verbatim to the messaging capability to resolve media.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// Whether the event carries media (`media_type` present and non-empty).
    pub fn has_media(&self) -> bool {
        self.media_type.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Whether the event quotes another message.
    pub fn has_quoted_message(&self) -> bool {
        self.quoted_message_id
            .as_deref()
            .is_some_and(|q| !q.is_empty())
    }

    /// Build the substitution context exposed to actions as `{event.<field>}`.
    ///
    /// The raw payload is deliberately excluded: it is a capability-only
    /// reference, not operator-visible data.
    pub fn context(&self) -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("event_type".into(), self.event_type.clone().into());
        ctx.insert("message_id".into(), self.message_id.clone().into());
        ctx.insert("chat".into(), self.chat_id.clone().into());
        ctx.insert("from".into(), self.sender_id.clone().into());
        if let Some(name) = &self.sender_name {
            ctx.insert("sender_name".into(), name.clone().into());
        }
        ctx.insert("is_group".into(), self.is_group.into());
        ctx.insert("is_from_me".into(), self.is_from_me.into());
        ctx.insert("message_type".into(), self.message_type.clone().into());
        if let Some(text) = &self.text_content {
            ctx.insert("text_content".into(), text.clone().into());
        }
        if let Some(media_type) = &self.media_type {
            ctx.insert("media_type".into(), media_type.clone().into());
        }
        if let Some(mime) = &self.media_mime_type {
            ctx.insert("media_mime_type".into(), mime.clone().into());
        }
        if let Some(size) = self.media_size {
            ctx.insert("media_size".into(), size.into());
        }
        if let Some(quoted) = &self.quoted_message_id {
            ctx.insert("quoted_message_id".into(), quoted.clone().into());
        }
        ctx.insert("timestamp".into(), self.timestamp.to_rfc3339().into());
        ctx
    }
}

impl Default for InboundEvent {
    fn default() -> Self {
        Self {
            event_type: "message".to_string(),
            message_id: String::new(),
            chat_id: String::new(),
            sender_id: String::new(),
            sender_name: None,
            is_group: false,
            is_from_me: false,
            message_type: "text".to_string(),
            text_content: None,
            media_type: None,
            media_mime_type: None,
            media_size: None,
            quoted_message_id: None,
            raw_payload: None,
            timestamp: Utc::now(),
        }
    }
}
