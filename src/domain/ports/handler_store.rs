use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::StoreError;
use crate::domain::models::{BreakerState, Handler, HandlerExecution};

/// Persistence port for handler definitions and the execution audit log.
///
/// Definitions are durable and survive restarts; runtime counters held by
/// the in-memory services (rate buckets, cooldown clocks) do not, and are
/// deliberately absent here.
#[async_trait]
pub trait HandlerStore: Send + Sync {
    /// Insert a new handler. Fails on duplicate `handler_id`.
    async fn save(&self, handler: &Handler) -> Result<(), StoreError>;

    /// Replace an existing handler record wholesale.
    async fn update(&self, handler: &Handler) -> Result<(), StoreError>;

    async fn get(&self, handler_id: &str) -> Result<Option<Handler>, StoreError>;

    /// Stored handlers, ordered by priority descending then `handler_id`
    /// ascending. Rows that fail to parse are skipped and logged, never
    /// returned as errors.
    async fn list(&self, enabled_only: bool) -> Result<Vec<Handler>, StoreError>;

    async fn delete(&self, handler_id: &str) -> Result<(), StoreError>;

    async fn set_enabled(&self, handler_id: &str, enabled: bool) -> Result<(), StoreError>;

    /// Fold one execution result into the handler's stats columns.
    async fn record_result(
        &self,
        handler_id: &str,
        success: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Persist a breaker transition and its failure counter.
    async fn set_breaker(
        &self,
        handler_id: &str,
        state: BreakerState,
        consecutive_failures: u32,
        last_error_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Append one row to the execution audit log.
    async fn append_execution(&self, execution: &HandlerExecution) -> Result<(), StoreError>;

    /// Most recent executions, newest first. `handler_id` narrows to one
    /// handler when present.
    async fn list_executions(
        &self,
        handler_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<HandlerExecution>, StoreError>;
}
