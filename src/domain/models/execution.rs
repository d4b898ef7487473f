//! Append-only execution audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::InboundEvent;

/// One row of the execution audit log.
///
/// A record is written for every attempt that reaches the executor,
/// successful or not. `id` is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerExecution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub handler_id: String,
    /// Message id of the event that triggered the execution.
    pub event_id: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Directives actually carried out (reserved no-ops excluded).
    pub actions_executed: u32,
}

impl HandlerExecution {
    pub fn success(
        handler_id: &str,
        event: &InboundEvent,
        started_at: DateTime<Utc>,
        duration_ms: i64,
        actions_executed: u32,
    ) -> Self {
        Self {
            id: None,
            handler_id: handler_id.to_string(),
            event_id: event.message_id.clone(),
            event_type: event.event_type.clone(),
            sender_id: Some(event.sender_id.clone()),
            started_at,
            completed_at: Utc::now(),
            duration_ms,
            success: true,
            error: None,
            actions_executed,
        }
    }

    pub fn failure(
        handler_id: &str,
        event: &InboundEvent,
        started_at: DateTime<Utc>,
        duration_ms: i64,
        error: String,
    ) -> Self {
        Self {
            id: None,
            handler_id: handler_id.to_string(),
            event_id: event.message_id.clone(),
            event_type: event.event_type.clone(),
            sender_id: Some(event.sender_id.clone()),
            started_at,
            completed_at: Utc::now(),
            duration_ms,
            success: false,
            error: Some(error),
            actions_executed: 0,
        }
    }
}
