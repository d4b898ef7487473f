//! Chathooks - Event-driven automation over messaging events
//!
//! Operators register declarative handlers (an event filter plus an action);
//! for every inbound messaging event the engine decides which handlers
//! apply, guards each with rate limits, cooldowns, and circuit breakers,
//! and runs the matched actions as isolated concurrent units.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): handler and event models, ports
//! - **Service Layer** (`services`): registry, matching, rate limiting,
//!   circuit breaking, action execution
//! - **Adapters** (`adapters`): reference `SQLite` handler store
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chathooks::adapters::sqlite::{create_pool, SqliteHandlerStore};
//! use chathooks::services::EventEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = create_pool("sqlite:.chathooks/chathooks.db", None).await?;
//!     SqliteHandlerStore::init_schema(&pool).await?;
//!     let store = Arc::new(SqliteHandlerStore::new(pool));
//!     // Wire messaging + script capabilities, build the engine,
//!     // engine.load().await?, then feed events into engine.handle_event.
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::error::EngineError;
pub use domain::models::{
    ActionDirective, Config, DatabaseConfig, EventFilter, ExecutorConfig, Handler, HandlerAction,
    HandlerExecution, HandlerPatch, HandlerRequest, InboundEvent, LoggingConfig,
};
pub use domain::ports::{
    HandlerStore, MessagingClient, MethodResult, ScriptOutcome, ScriptRunner, StoreError,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ActionExecutor, EventEngine, EventMatcher, HandlerRegistry, RateLimiterService};
