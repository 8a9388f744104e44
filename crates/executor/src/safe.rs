//! Safe executor wrapper: turns failures into tool results.
//!
//! Tool-level failures must never abort a task. Every registered executor is
//! wrapped so that an error (or a panic) becomes a descriptive result string
//! the model can read and self-correct from.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use taskpilot_core::command::{Command, CommandExecutor, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tracing::warn;

/// Custom conversion of an executor error. May still propagate the error.
pub type ErrorHandler =
    Arc<dyn Fn(&Command, &ToolError) -> Result<CommandResult, ToolError> + Send + Sync>;

/// An executor wrapped with error absorption.
#[derive(Clone)]
pub struct SafeExecutor {
    inner: Arc<dyn CommandExecutor>,
    handler: Option<ErrorHandler>,
}

impl SafeExecutor {
    pub fn new(inner: Arc<dyn CommandExecutor>) -> Self {
        Self { inner, handler: None }
    }

    pub fn with_handler(inner: Arc<dyn CommandExecutor>, handler: ErrorHandler) -> Self {
        Self { inner, handler: Some(handler) }
    }

    /// The unwrapped executor, used as the terminal step of the middleware chain.
    pub fn inner(&self) -> &dyn CommandExecutor {
        self.inner.as_ref()
    }

    /// Convert an outcome of this executor (or of a chain ending in it).
    pub fn absorb(
        &self,
        command: &Command,
        outcome: Result<CommandResult, ToolError>,
    ) -> Result<CommandResult, ToolError> {
        match outcome {
            Ok(result) => Ok(result),
            Err(error) => match &self.handler {
                Some(handler) => handler(command, &error),
                None => {
                    warn!(command = %command.kind, error = %error, "Command failed, reporting as tool result");
                    Ok(error_result(command, &error))
                }
            },
        }
    }
}

#[async_trait]
impl CommandExecutor for SafeExecutor {
    fn required_params(&self) -> &[&'static str] {
        self.inner.required_params()
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }

    async fn execute(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> Result<CommandResult, ToolError> {
        let outcome = AssertUnwindSafe(self.inner.execute(command, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload)));
        self.absorb(command, outcome)
    }
}

/// The default textual form of a failure.
pub fn error_result(command: &Command, error: &ToolError) -> CommandResult {
    match error {
        ToolError::InvalidArguments(reason) => CommandResult::invalid(format!(
            "Invalid parameters for '{}': {reason}. Please retry with all required parameters.",
            command.kind
        )),
        other => CommandResult::failed(format!(
            "Error executing '{}': {other}",
            command.kind
        )),
    }
}

/// Turn a caught panic payload into a tool error.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> ToolError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ToolError::Panicked(message)
}
