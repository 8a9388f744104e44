//! The command pipeline: registry lookup, validation, middleware, safety.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use taskpilot_core::command::{Command, CommandExecutor, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tracing::{debug, warn};

use crate::middleware::{Middleware, Next};
use crate::registry::ExecutorRegistry;
use crate::safe::{panic_error, ErrorHandler};

/// A task's executor registry plus its middleware chain.
#[derive(Default)]
pub struct CommandPipeline {
    registry: ExecutorRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl CommandPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware. Earlier registrations wrap later ones.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        debug!(middleware = middleware.name(), "Middleware added");
        self.middlewares.push(middleware);
        self
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn CommandExecutor>) -> &mut Self {
        self.registry.register(kind, executor);
        self
    }

    pub fn register_with_handler(
        &mut self,
        kind: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
        handler: ErrorHandler,
    ) -> &mut Self {
        self.registry.register_with_handler(kind, executor, handler);
        self
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Dispatch a command.
    ///
    /// Returns `None` when no executor is registered for the type. Failures
    /// anywhere in the chain are absorbed by the entry's safe wrapper.
    pub async fn run(&self, command: &Command, ctx: &ExecutionContext) -> Option<CommandResult> {
        let Some(entry) = self.registry.get(&command.kind) else {
            warn!(task_id = %ctx.task_id, command = %command.kind, "No executor registered for command");
            return None;
        };

        if let Some(invalid) = validate(command, entry.required_params()) {
            return Some(invalid);
        }

        let outcome = AssertUnwindSafe(Next::new(&self.middlewares, entry.inner()).run(command, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload)));

        match entry.absorb(command, outcome) {
            Ok(result) => Some(result),
            // Only a custom handler can get here
            Err(e) => Some(crate::safe::error_result(command, &e)),
        }
    }

    /// Dispatch a command and surface chain errors unconverted.
    pub async fn run_unguarded(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> Result<Option<CommandResult>, ToolError> {
        let Some(entry) = self.registry.get(&command.kind) else {
            return Ok(None);
        };
        if let Some(invalid) = validate(command, entry.required_params()) {
            return Ok(Some(invalid));
        }
        Next::new(&self.middlewares, entry.inner())
            .run(command, ctx)
            .await
            .map(Some)
    }
}

fn validate(command: &Command, required: &[&'static str]) -> Option<CommandResult> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !command.params.contains_key(*name))
        .collect();
    if missing.is_empty() {
        return None;
    }
    warn!(command = %command.kind, missing = ?missing, "Command is missing required parameters");
    Some(crate::safe::error_result(
        command,
        &ToolError::InvalidArguments(format!("missing required parameter(s): {}", missing.join(", "))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::RetryMiddleware;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use taskpilot_core::command::CommandStatus;
    use taskpilot_core::message::TaskId;

    struct AlwaysFails {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CommandExecutor for AlwaysFails {
        async fn execute(&self, command: &Command, _: &ExecutionContext) -> Result<CommandResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::ExecutionFailed {
                tool_name: command.kind.clone(),
                reason: "permission denied".into(),
            })
        }
    }

    struct ReadFile;

    #[async_trait]
    impl CommandExecutor for ReadFile {
        fn required_params(&self) -> &[&'static str] {
            &["path"]
        }

        async fn execute(&self, command: &Command, _: &ExecutionContext) -> Result<CommandResult, ToolError> {
            Ok(CommandResult::success(format!("contents of {}", command.param("path").unwrap_or_default())))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(TaskId::from("t"))
    }

    #[tokio::test]
    async fn unknown_command_returns_none() {
        let pipeline = CommandPipeline::new();
        assert!(pipeline.run(&Command::new("nope"), &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn dispatches_to_registered_executor() {
        let mut pipeline = CommandPipeline::new();
        pipeline.register("read_file", Arc::new(ReadFile));
        let cmd = Command::new("read_file").with_param("path", "a.rs");
        let result = pipeline.run(&cmd, &ctx()).await.unwrap();
        assert_eq!(result.output, "contents of a.rs");
    }

    #[tokio::test]
    async fn missing_params_are_invalid_without_dispatch() {
        let mut pipeline = CommandPipeline::new();
        pipeline.register("read_file", Arc::new(ReadFile));
        let result = pipeline.run(&Command::new("read_file"), &ctx()).await.unwrap();
        assert_eq!(result.status, CommandStatus::InvalidParams);
        assert!(result.output.contains("path"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_become_tool_result() {
        let exec = Arc::new(AlwaysFails { calls: AtomicU32::new(0) });
        let mut pipeline = CommandPipeline::new();
        pipeline
            .use_middleware(Arc::new(RetryMiddleware::new(3, Duration::from_millis(10))))
            .register("shell", exec.clone());

        let result = pipeline.run(&Command::new("shell"), &ctx()).await.unwrap();

        assert_eq!(result.status, CommandStatus::Failed);
        assert!(result.output.contains("permission denied"));
        assert_eq!(exec.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unguarded_run_surfaces_errors() {
        let mut pipeline = CommandPipeline::new();
        pipeline.register("shell", Arc::new(AlwaysFails { calls: AtomicU32::new(0) }));
        let err = pipeline.run_unguarded(&Command::new("shell"), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn handler_receives_chain_errors() {
        let mut pipeline = CommandPipeline::new();
        let handler: ErrorHandler = Arc::new(|cmd, _| Ok(CommandResult::failed(format!("{} is unavailable", cmd.kind))));
        pipeline.register_with_handler("shell", Arc::new(AlwaysFails { calls: AtomicU32::new(0) }), handler);
        let result = pipeline.run(&Command::new("shell"), &ctx()).await.unwrap();
        assert_eq!(result.output, "shell is unavailable");
    }
}
