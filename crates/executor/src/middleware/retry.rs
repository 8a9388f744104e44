//! Retry middleware: re-invokes the inner chain on failure.

use async_trait::async_trait;
use std::time::Duration;
use taskpilot_core::command::{Command, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tracing::warn;

use super::{Middleware, Next};

/// Runs the inner chain up to `1 + max_retries` times with a fixed delay.
///
/// The error of the last attempt is returned once every attempt failed.
/// Successful results carry an `attempts` metadata entry.
pub struct RetryMiddleware {
    max_retries: u32,
    delay: Duration,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        next: Next<'_>,
    ) -> Result<CommandResult, ToolError> {
        let mut attempt: u32 = 1;
        loop {
            match next.run(command, ctx).await {
                Ok(result) => return Ok(result.with_metadata("attempts", attempt)),
                Err(e) if attempt > self.max_retries => return Err(e),
                Err(e) => {
                    warn!(
                        command = %command.kind,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Command attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
