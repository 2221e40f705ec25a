//! Handler registry — stable string key → task handler.
//!
//! Handlers are registered once at startup; the executor resolves them by
//! the key stored on each task. An unresolved key is a first-class error
//! path (the task gets suspended), never a panic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use caredesk_core::Result;

use crate::task::{ScheduledTask, TaskOutcome};

/// Pluggable unit of business logic bound to a task by its `handler` key.
///
/// Business failures travel inside `Ok` as [`TaskOutcome::FailureRetry`] /
/// [`TaskOutcome::FailureEnd`]; an `Err` means the handler itself broke and
/// the executor skips the cycle without touching the task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> Result<TaskOutcome>;
}

/// Name → handler lookup, populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, replacing any previous registration.
    pub fn register(&mut self, key: &str, handler: Arc<dyn TaskHandler>) {
        tracing::info!("📋 Handler registered: '{key}'");
        self.handlers.insert(key.to_string(), handler);
    }

    pub fn resolve(&self, key: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
