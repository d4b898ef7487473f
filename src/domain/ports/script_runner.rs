use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::error::EngineError;

/// Outcome of running operator-supplied action code.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// The script's result value; when it is a JSON object containing a
    /// `actions` array, the executor runs those as directives.
    pub output: Option<Value>,
}

/// Capability port for scripted actions.
///
/// The runner receives the code verbatim plus the event context the code
/// sees as `event.<field>`. Sandboxing and language are the
/// implementation's concern.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `code` against the event context. `timeout_seconds` is advisory
    /// for the implementation; the caller enforces its own deadline on top.
    async fn run(
        &self,
        code: &str,
        event_context: &Map<String, Value>,
        timeout_seconds: u32,
    ) -> Result<ScriptOutcome, EngineError>;
}
