use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::EngineError;
use crate::domain::models::InboundEvent;

/// Result of a messaging method invocation.
#[derive(Debug, Clone, Default)]
pub struct MethodResult {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<Value>,
}

impl MethodResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// Capability port onto the messaging backend.
///
/// The engine never speaks the backend protocol itself; every outbound
/// effect goes through `invoke`, keyed by method name with a JSON params
/// object. Unknown methods are the backend's problem to reject.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Invoke a named backend method with JSON parameters.
    async fn invoke(&self, method: &str, params: Value) -> Result<MethodResult, EngineError>;

    /// Fetch the media attached to an event and write it to `dest`.
    ///
    /// `dest` may already exist from an earlier resolution of the same
    /// message; implementations should treat that as success.
    async fn download_media(&self, event: &InboundEvent, dest: &Path) -> Result<(), EngineError>;
}
