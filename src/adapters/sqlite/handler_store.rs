//! SQLite implementation of the `HandlerStore`.
//!
//! Handler definitions live in `event_handlers`; every execution appends a
//! row to `handler_executions`. Filters and actions are stored as JSON
//! text columns and parsed back on read; a row whose JSON no longer parses
//! is skipped by `list` with a warning rather than failing the whole load.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::domain::models::{
    BreakerState, CircuitBreaker, EventFilter, ExecutionLimits, Handler, HandlerAction,
    HandlerExecution, HandlerStats,
};
use crate::domain::ports::{HandlerStore, StoreError};

#[derive(Clone)]
pub struct SqliteHandlerStore {
    pool: SqlitePool,
}

impl SqliteHandlerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS event_handlers (
                handler_id TEXT PRIMARY KEY,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                priority INTEGER NOT NULL DEFAULT 0,
                event_filter TEXT NOT NULL,
                action TEXT NOT NULL,
                max_per_minute INTEGER,
                max_per_hour INTEGER,
                max_per_sender_per_hour INTEGER,
                cooldown_seconds INTEGER NOT NULL DEFAULT 0,
                timeout_seconds INTEGER NOT NULL DEFAULT 30,
                circuit_breaker_enabled INTEGER NOT NULL DEFAULT 1,
                circuit_breaker_threshold INTEGER NOT NULL DEFAULT 5,
                circuit_breaker_reset_seconds INTEGER NOT NULL DEFAULT 300,
                circuit_breaker_state TEXT NOT NULL DEFAULT 'closed',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                execution_count INTEGER NOT NULL DEFAULT 0,
                total_errors INTEGER NOT NULL DEFAULT 0,
                last_executed TEXT,
                last_error TEXT,
                last_error_time TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS handler_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handler_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                sender_id TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                actions_executed INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_handler_executions_handler
             ON handler_executions(handler_id, completed_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl HandlerStore for SqliteHandlerStore {
    async fn save(&self, handler: &Handler) -> Result<(), StoreError> {
        let filter_json = serde_json::to_string(&handler.event_filter)?;
        let action_json = serde_json::to_string(&handler.action)?;

        let result = sqlx::query(
            r#"INSERT INTO event_handlers (handler_id, description, enabled, priority,
               event_filter, action, max_per_minute, max_per_hour, max_per_sender_per_hour,
               cooldown_seconds, timeout_seconds, circuit_breaker_enabled,
               circuit_breaker_threshold, circuit_breaker_reset_seconds,
               circuit_breaker_state, consecutive_failures, execution_count, total_errors,
               last_executed, last_error, last_error_time, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&handler.handler_id)
        .bind(&handler.description)
        .bind(handler.enabled)
        .bind(handler.priority)
        .bind(&filter_json)
        .bind(&action_json)
        .bind(handler.limits.max_per_minute.map(i64::from))
        .bind(handler.limits.max_per_hour.map(i64::from))
        .bind(handler.limits.max_per_sender_per_hour.map(i64::from))
        .bind(i64::from(handler.limits.cooldown_seconds))
        .bind(i64::from(handler.limits.timeout_seconds))
        .bind(handler.breaker.enabled)
        .bind(i64::from(handler.breaker.threshold))
        .bind(i64::from(handler.breaker.reset_seconds))
        .bind(handler.breaker.state.as_str())
        .bind(i64::from(handler.breaker.consecutive_failures))
        .bind(i64::try_from(handler.stats.execution_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(handler.stats.total_errors).unwrap_or(i64::MAX))
        .bind(handler.stats.last_executed.map(|t| t.to_rfc3339()))
        .bind(&handler.stats.last_error)
        .bind(handler.breaker.last_error_time.map(|t| t.to_rfc3339()))
        .bind(handler.created_at.to_rfc3339())
        .bind(handler.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StoreError::ConstraintViolation(format!(
                    "handler already exists: {}",
                    handler.handler_id
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, handler: &Handler) -> Result<(), StoreError> {
        let filter_json = serde_json::to_string(&handler.event_filter)?;
        let action_json = serde_json::to_string(&handler.action)?;

        let result = sqlx::query(
            r#"UPDATE event_handlers SET description = ?, enabled = ?, priority = ?,
               event_filter = ?, action = ?, max_per_minute = ?, max_per_hour = ?,
               max_per_sender_per_hour = ?, cooldown_seconds = ?, timeout_seconds = ?,
               circuit_breaker_enabled = ?, circuit_breaker_threshold = ?,
               circuit_breaker_reset_seconds = ?, updated_at = ?
               WHERE handler_id = ?"#,
        )
        .bind(&handler.description)
        .bind(handler.enabled)
        .bind(handler.priority)
        .bind(&filter_json)
        .bind(&action_json)
        .bind(handler.limits.max_per_minute.map(i64::from))
        .bind(handler.limits.max_per_hour.map(i64::from))
        .bind(handler.limits.max_per_sender_per_hour.map(i64::from))
        .bind(i64::from(handler.limits.cooldown_seconds))
        .bind(i64::from(handler.limits.timeout_seconds))
        .bind(handler.breaker.enabled)
        .bind(i64::from(handler.breaker.threshold))
        .bind(i64::from(handler.breaker.reset_seconds))
        .bind(handler.updated_at.to_rfc3339())
        .bind(&handler.handler_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::HandlerNotFound(handler.handler_id.clone()));
        }
        Ok(())
    }

    async fn get(&self, handler_id: &str) -> Result<Option<Handler>, StoreError> {
        let row: Option<HandlerRow> =
            sqlx::query_as("SELECT * FROM event_handlers WHERE handler_id = ?")
                .bind(handler_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Handler::try_from).transpose()
    }

    async fn list(&self, enabled_only: bool) -> Result<Vec<Handler>, StoreError> {
        let query = if enabled_only {
            "SELECT * FROM event_handlers WHERE enabled = 1
             ORDER BY priority DESC, handler_id ASC"
        } else {
            "SELECT * FROM event_handlers ORDER BY priority DESC, handler_id ASC"
        };
        let rows: Vec<HandlerRow> = sqlx::query_as(query).fetch_all(&self.pool).await?;

        let mut handlers = Vec::with_capacity(rows.len());
        for row in rows {
            let handler_id = row.handler_id.clone();
            match Handler::try_from(row) {
                Ok(handler) => handlers.push(handler),
                Err(e) => {
                    warn!(handler_id = %handler_id, error = %e, "skipping malformed handler row");
                }
            }
        }
        Ok(handlers)
    }

    async fn delete(&self, handler_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM event_handlers WHERE handler_id = ?")
            .bind(handler_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::HandlerNotFound(handler_id.to_string()));
        }
        Ok(())
    }

    async fn set_enabled(&self, handler_id: &str, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE event_handlers SET enabled = ?, updated_at = ? WHERE handler_id = ?",
        )
        .bind(enabled)
        .bind(Utc::now().to_rfc3339())
        .bind(handler_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::HandlerNotFound(handler_id.to_string()));
        }
        Ok(())
    }

    async fn record_result(
        &self,
        handler_id: &str,
        success: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if success {
            sqlx::query(
                "UPDATE event_handlers SET execution_count = execution_count + 1,
                 last_executed = ? WHERE handler_id = ?",
            )
            .bind(at.to_rfc3339())
            .bind(handler_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE event_handlers SET execution_count = execution_count + 1,
                 total_errors = total_errors + 1, last_executed = ?, last_error = ?
                 WHERE handler_id = ?",
            )
            .bind(at.to_rfc3339())
            .bind(error.unwrap_or("unknown error"))
            .bind(handler_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn set_breaker(
        &self,
        handler_id: &str,
        state: BreakerState,
        consecutive_failures: u32,
        last_error_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE event_handlers SET circuit_breaker_state = ?, consecutive_failures = ?,
             last_error_time = ? WHERE handler_id = ?",
        )
        .bind(state.as_str())
        .bind(i64::from(consecutive_failures))
        .bind(last_error_time.map(|t| t.to_rfc3339()))
        .bind(handler_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_execution(&self, execution: &HandlerExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO handler_executions (handler_id, event_id, event_type, sender_id,
               started_at, completed_at, duration_ms, success, error, actions_executed)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&execution.handler_id)
        .bind(&execution.event_id)
        .bind(&execution.event_type)
        .bind(&execution.sender_id)
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.to_rfc3339())
        .bind(execution.duration_ms)
        .bind(execution.success)
        .bind(&execution.error)
        .bind(i64::from(execution.actions_executed))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_executions(
        &self,
        handler_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<HandlerExecution>, StoreError> {
        let rows: Vec<ExecutionRow> = match handler_id {
            Some(id) => {
                sqlx::query_as(
                    "SELECT * FROM handler_executions WHERE handler_id = ?
                     ORDER BY completed_at DESC, id DESC LIMIT ?",
                )
                .bind(id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM handler_executions
                     ORDER BY completed_at DESC, id DESC LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(HandlerExecution::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct HandlerRow {
    handler_id: String,
    description: Option<String>,
    enabled: bool,
    priority: i32,
    event_filter: String,
    action: String,
    max_per_minute: Option<i64>,
    max_per_hour: Option<i64>,
    max_per_sender_per_hour: Option<i64>,
    cooldown_seconds: i64,
    timeout_seconds: i64,
    circuit_breaker_enabled: bool,
    circuit_breaker_threshold: i64,
    circuit_breaker_reset_seconds: i64,
    circuit_breaker_state: String,
    consecutive_failures: i64,
    execution_count: i64,
    total_errors: i64,
    last_executed: Option<String>,
    last_error: Option<String>,
    last_error_time: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<HandlerRow> for Handler {
    type Error = StoreError;

    fn try_from(row: HandlerRow) -> Result<Self, Self::Error> {
        let event_filter: EventFilter = serde_json::from_str(&row.event_filter)?;
        let action: HandlerAction = serde_json::from_str(&row.action)?;
        let state = row
            .circuit_breaker_state
            .parse::<BreakerState>()
            .unwrap_or(BreakerState::Closed);

        Ok(Handler {
            handler_id: row.handler_id,
            description: row.description,
            enabled: row.enabled,
            priority: row.priority,
            event_filter,
            action,
            limits: ExecutionLimits {
                max_per_minute: row.max_per_minute.map(clamp_u32),
                max_per_hour: row.max_per_hour.map(clamp_u32),
                max_per_sender_per_hour: row.max_per_sender_per_hour.map(clamp_u32),
                cooldown_seconds: clamp_u32(row.cooldown_seconds),
                timeout_seconds: clamp_u32(row.timeout_seconds),
            },
            breaker: CircuitBreaker {
                enabled: row.circuit_breaker_enabled,
                threshold: clamp_u32(row.circuit_breaker_threshold),
                reset_seconds: clamp_u32(row.circuit_breaker_reset_seconds),
                state,
                consecutive_failures: clamp_u32(row.consecutive_failures),
                last_error_time: parse_opt_timestamp(row.last_error_time.as_deref())?,
            },
            stats: HandlerStats {
                execution_count: u64::try_from(row.execution_count).unwrap_or(0),
                total_errors: u64::try_from(row.total_errors).unwrap_or(0),
                last_executed: parse_opt_timestamp(row.last_executed.as_deref())?,
                last_error: row.last_error,
            },
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: i64,
    handler_id: String,
    event_id: String,
    event_type: String,
    sender_id: Option<String>,
    started_at: String,
    completed_at: String,
    duration_ms: i64,
    success: bool,
    error: Option<String>,
    actions_executed: i64,
}

impl TryFrom<ExecutionRow> for HandlerExecution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(HandlerExecution {
            id: Some(row.id),
            handler_id: row.handler_id,
            event_id: row.event_id,
            event_type: row.event_type,
            sender_id: row.sender_id,
            started_at: parse_timestamp(&row.started_at)?,
            completed_at: parse_timestamp(&row.completed_at)?,
            duration_ms: row.duration_ms,
            success: row.success,
            error: row.error,
            actions_executed: clamp_u32(row.actions_executed),
        })
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_opt_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(parse_timestamp).transpose()
}
