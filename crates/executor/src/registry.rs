//! Per-task executor registry.
//!
//! Maps a command type to its executor. Every entry is wrapped in a
//! [`SafeExecutor`] at registration time. Registries are built by an explicit
//! list of `register` calls and owned by exactly one task.

use std::collections::HashMap;
use std::sync::Arc;
use taskpilot_core::command::CommandExecutor;
use tracing::{debug, warn};

use crate::safe::{ErrorHandler, SafeExecutor};

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, SafeExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor. Replaces any existing entry for the type.
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn CommandExecutor>) {
        self.insert(kind.into(), SafeExecutor::new(executor));
    }

    /// Register an executor whose failures go through a custom handler.
    pub fn register_with_handler(
        &mut self,
        kind: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
        handler: ErrorHandler,
    ) {
        self.insert(kind.into(), SafeExecutor::with_handler(executor, handler));
    }

    fn insert(&mut self, kind: String, executor: SafeExecutor) {
        if self.executors.contains_key(&kind) {
            warn!(command = %kind, "Executor already registered, replacing it");
        } else {
            debug!(command = %kind, "Executor registered");
        }
        self.executors.insert(kind, executor);
    }

    /// Get the wrapped executor for a command type.
    pub fn get(&self, kind: &str) -> Option<&SafeExecutor> {
        self.executors.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// Registered command types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskpilot_core::command::{Command, CommandResult, ExecutionContext};
    use taskpilot_core::error::ToolError;
    use taskpilot_core::message::TaskId;

    struct Fixed(&'static str);

    #[async_trait]
    impl CommandExecutor for Fixed {
        async fn execute(&self, _: &Command, _: &ExecutionContext) -> Result<CommandResult, ToolError> {
            Ok(CommandResult::success(self.0))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(Fixed("a")));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.kinds(), vec!["echo"]);
    }

    #[tokio::test]
    async fn reregistering_replaces_entry() {
        let mut registry = ExecutorRegistry::new();
        registry.register("echo", Arc::new(Fixed("first")));
        registry.register("echo", Arc::new(Fixed("second")));
        assert_eq!(registry.len(), 1);

        let ctx = ExecutionContext::new(TaskId::from("t"));
        let result = registry
            .get("echo")
            .unwrap()
            .execute(&Command::new("echo"), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "second");
    }
}
