pub mod config;
pub mod event;
pub mod execution;
pub mod handler;

pub use config::{Config, DatabaseConfig, ExecutorConfig, LoggingConfig};
pub use event::InboundEvent;
pub use execution::HandlerExecution;
pub use handler::{
    ActionDirective, BreakerState, CircuitBreaker, EventFilter, ExecutionLimits, Handler,
    HandlerAction, HandlerPatch, HandlerRequest, HandlerStats,
};
