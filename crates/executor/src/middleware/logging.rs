//! Logging middleware: start/end/error events with wall-clock timestamps.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;
use taskpilot_core::command::{Command, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tracing::{error, info};

use super::{Middleware, Next};

pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        next: Next<'_>,
    ) -> Result<CommandResult, ToolError> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            task_id = %ctx.task_id,
            command = %command.kind,
            started_at = %started_at.to_rfc3339(),
            "Command started"
        );

        let outcome = next.run(command, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(result) => info!(
                task_id = %ctx.task_id,
                command = %command.kind,
                status = ?result.status,
                ended_at = %Utc::now().to_rfc3339(),
                duration_ms,
                "Command finished"
            ),
            Err(e) => error!(
                task_id = %ctx.task_id,
                command = %command.kind,
                error = %e,
                ended_at = %Utc::now().to_rfc3339(),
                duration_ms,
                "Command errored"
            ),
        }

        outcome
    }
}
