pub mod circuit_breaker;
pub mod engine;
pub mod executor;
pub mod matcher;
pub mod rate_limiter;
pub mod registry;

pub use engine::EventEngine;
pub use executor::ActionExecutor;
pub use matcher::EventMatcher;
pub use rate_limiter::RateLimiterService;
pub use registry::HandlerRegistry;
