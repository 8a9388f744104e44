//! Middleware chain: ordered interceptors around command execution.
//!
//! Middlewares compose in the onion model: the first registered is the
//! outermost. Each one receives a [`Next`] handle for the rest of the chain;
//! not calling it short-circuits everything inside.

pub mod caching;
pub mod logging;
pub mod performance;
pub mod retry;

use async_trait::async_trait;
use std::sync::Arc;
use taskpilot_core::command::{Command, CommandExecutor, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;

pub use caching::CachingMiddleware;
pub use logging::LoggingMiddleware;
pub use performance::{PerformanceMiddleware, PerformanceSample};
pub use retry::RetryMiddleware;

/// An interceptor wrapped around command execution.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        next: Next<'_>,
    ) -> Result<CommandResult, ToolError>;
}

/// The remainder of a chain: inner middlewares plus the terminal executor.
///
/// `Copy`, so a middleware may invoke it more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn CommandExecutor,
}

impl<'a> Next<'a> {
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], terminal: &'a dyn CommandExecutor) -> Self {
        Self { middlewares, terminal }
    }

    pub async fn run(
        self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> Result<CommandResult, ToolError> {
        match self.middlewares.split_first() {
            Some((outer, inner)) => {
                let next = Next { middlewares: inner, terminal: self.terminal };
                outer.handle(command, ctx, next).await
            }
            None => self.terminal.execute(command, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use taskpilot_core::message::TaskId;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Recording {
        fn name(&self) -> &str {
            self.label
        }

        async fn handle(
            &self,
            command: &Command,
            ctx: &ExecutionContext,
            next: Next<'_>,
        ) -> Result<CommandResult, ToolError> {
            self.log.lock().unwrap().push(format!("{}-before", self.label));
            let result = next.run(command, ctx).await;
            self.log.lock().unwrap().push(format!("{}-after", self.label));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        fn name(&self) -> &str {
            "short"
        }

        async fn handle(&self, _: &Command, _: &ExecutionContext, _: Next<'_>) -> Result<CommandResult, ToolError> {
            Ok(CommandResult::success("blocked"))
        }
    }

    struct Terminal {
        log: Log,
    }

    #[async_trait]
    impl CommandExecutor for Terminal {
        async fn execute(&self, _: &Command, _: &ExecutionContext) -> Result<CommandResult, ToolError> {
            self.log.lock().unwrap().push("executor".into());
            Ok(CommandResult::success("done"))
        }
    }

    fn recording(label: &'static str, log: &Log) -> Arc<dyn Middleware> {
        Arc::new(Recording { label, log: log.clone() })
    }

    #[tokio::test]
    async fn first_registered_is_outermost() {
        let log: Log = Arc::default();
        let chain = vec![recording("A", &log), recording("B", &log), recording("C", &log)];
        let terminal = Terminal { log: log.clone() };
        let ctx = ExecutionContext::new(TaskId::from("t"));

        let result = Next::new(&chain, &terminal)
            .run(&Command::new("x"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.output, "done");
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "A-before", "B-before", "C-before", "executor", "C-after", "B-after", "A-after"
            ]
        );
    }

    #[tokio::test]
    async fn skipping_next_short_circuits() {
        let log: Log = Arc::default();
        let chain = vec![recording("A", &log), Arc::new(ShortCircuit) as Arc<dyn Middleware>, recording("C", &log)];
        let terminal = Terminal { log: log.clone() };
        let ctx = ExecutionContext::new(TaskId::from("t"));

        let result = Next::new(&chain, &terminal)
            .run(&Command::new("x"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.output, "blocked");
        assert_eq!(*log.lock().unwrap(), vec!["A-before", "A-after"]);
    }
}
