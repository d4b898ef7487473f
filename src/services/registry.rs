//! Handler registry: CRUD facade over the store plus the matching snapshot.
//!
//! The matcher never queries the store directly; it reads an immutable
//! snapshot of enabled handlers that `load()` rebuilds wholesale and swaps
//! atomically. Mutating operations write through to the store but do NOT
//! refresh the snapshot; callers reload explicitly when they want the
//! change live.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::error::EngineError;
use crate::domain::models::{Handler, HandlerExecution, HandlerPatch, HandlerRequest};
use crate::domain::ports::{HandlerStore, StoreError};

const DEFAULT_EXECUTION_LIMIT: u32 = 50;

pub struct HandlerRegistry {
    store: Arc<dyn HandlerStore>,
    snapshot: RwLock<Arc<Vec<Handler>>>,
}

impl HandlerRegistry {
    pub fn new(store: Arc<dyn HandlerStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Rebuild the matching snapshot from the store. Malformed rows were
    /// already skipped by the store's `list`; whatever comes back is
    /// published wholesale. Returns the number of handlers now live.
    pub async fn load(&self) -> Result<usize, EngineError> {
        let handlers = self.store.list(true).await?;
        let count = handlers.len();
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            *snapshot = Arc::new(handlers);
        }
        info!(count, "handler snapshot reloaded");
        Ok(count)
    }

    /// The currently published snapshot. Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<Vec<Handler>> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Validate and store a new handler. Fails if the id is taken.
    pub async fn register(&self, request: HandlerRequest) -> Result<Handler, EngineError> {
        let handler = request.into_handler()?;
        if self.store.get(&handler.handler_id).await?.is_some() {
            return Err(EngineError::HandlerExists(handler.handler_id));
        }
        self.store.save(&handler).await?;
        info!(handler_id = %handler.handler_id, priority = handler.priority, "handler registered");
        Ok(handler)
    }

    /// Merge a partial update into an existing handler.
    pub async fn update(
        &self,
        handler_id: &str,
        patch: HandlerPatch,
    ) -> Result<Handler, EngineError> {
        let mut handler = self.require(handler_id).await?;
        patch.apply_to(&mut handler);
        handler.updated_at = Utc::now();
        self.store.update(&handler).await?;
        debug!(handler_id, "handler updated");
        Ok(handler)
    }

    pub async fn remove(&self, handler_id: &str) -> Result<(), EngineError> {
        self.require(handler_id).await?;
        self.store.delete(handler_id).await?;
        info!(handler_id, "handler removed");
        Ok(())
    }

    pub async fn set_enabled(&self, handler_id: &str, enabled: bool) -> Result<(), EngineError> {
        self.require(handler_id).await?;
        self.store.set_enabled(handler_id, enabled).await?;
        info!(handler_id, enabled, "handler enabled flag changed");
        Ok(())
    }

    pub async fn get(&self, handler_id: &str) -> Result<Handler, EngineError> {
        self.require(handler_id).await
    }

    pub async fn list(&self, enabled_only: bool) -> Result<Vec<Handler>, EngineError> {
        Ok(self.store.list(enabled_only).await?)
    }

    /// Recent execution records, newest first. `limit` 0 means the default.
    pub async fn executions(
        &self,
        handler_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<HandlerExecution>, EngineError> {
        let limit = if limit == 0 {
            DEFAULT_EXECUTION_LIMIT
        } else {
            limit
        };
        Ok(self.store.list_executions(handler_id, limit).await?)
    }

    async fn require(&self, handler_id: &str) -> Result<Handler, EngineError> {
        match self.store.get(handler_id).await {
            Ok(Some(handler)) => Ok(handler),
            Ok(None) | Err(StoreError::HandlerNotFound(_)) => {
                Err(EngineError::HandlerNotFound(handler_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
