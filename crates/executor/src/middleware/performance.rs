//! Performance middleware: wall-clock and resident-memory sampling.
//!
//! Resident memory is read from the `VmRSS` line of `/proc/self/status` where
//! available; elsewhere only timings are recorded.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::time::Instant;
use taskpilot_core::command::{Command, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tracing::debug;

use super::{Middleware, Next};

/// One measured execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    pub command: String,
    pub duration_ms: u64,
    /// Resident-set change in bytes, if it could be sampled
    pub memory_delta_bytes: Option<i64>,
    pub success: bool,
}

#[derive(Default)]
pub struct PerformanceMiddleware {
    samples: Mutex<Vec<PerformanceSample>>,
}

impl PerformanceMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// All samples recorded so far.
    pub fn samples(&self) -> Vec<PerformanceSample> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mean duration for one command type.
    pub fn average_ms(&self, kind: &str) -> Option<f64> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let durations: Vec<u64> = samples
            .iter()
            .filter(|s| s.command == kind)
            .map(|s| s.duration_ms)
            .collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<u64>() as f64 / durations.len() as f64)
    }
}

async fn resident_bytes() -> Option<i64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_vm_rss(&status)
}

/// `VmRSS:   12345 kB` in bytes.
fn parse_vm_rss(status: &str) -> Option<i64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: i64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[async_trait]
impl Middleware for PerformanceMiddleware {
    fn name(&self) -> &str {
        "performance"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        next: Next<'_>,
    ) -> Result<CommandResult, ToolError> {
        let memory_before = resident_bytes().await;
        let start = Instant::now();

        let outcome = next.run(command, ctx).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let memory_delta_bytes = match (memory_before, resident_bytes().await) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        };
        debug!(
            command = %command.kind,
            duration_ms,
            memory_delta_bytes = ?memory_delta_bytes,
            "Command performance"
        );

        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PerformanceSample {
                command: command.kind.clone(),
                duration_ms,
                memory_delta_bytes,
                success: matches!(&outcome, Ok(r) if r.is_success()),
            });

        outcome.map(|result| {
            result.with_metadata(
                "performance",
                json!({ "duration_ms": duration_ms, "memory_delta_bytes": memory_delta_bytes }),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use taskpilot_core::command::CommandExecutor;
    use taskpilot_core::message::TaskId;

    struct Ok200;

    #[async_trait]
    impl CommandExecutor for Ok200 {
        async fn execute(&self, _: &Command, _: &ExecutionContext) -> Result<CommandResult, ToolError> {
            Ok(CommandResult::success("fine"))
        }
    }

    #[tokio::test]
    async fn records_a_sample_per_execution() {
        let perf = Arc::new(PerformanceMiddleware::new());
        let chain: Vec<Arc<dyn Middleware>> = vec![perf.clone()];
        let ctx = ExecutionContext::new(TaskId::from("t"));

        let result = Next::new(&chain, &Ok200).run(&Command::new("read_file"), &ctx).await.unwrap();
        Next::new(&chain, &Ok200).run(&Command::new("read_file"), &ctx).await.unwrap();

        assert!(result.metadata.contains_key("performance"));
        let samples = perf.samples();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.success && s.command == "read_file"));
        assert!(perf.average_ms("read_file").is_some());
        assert!(perf.average_ms("other").is_none());
    }

    #[test]
    fn resident_size_is_read_in_kib() {
        let status = "Name:\ttaskpilot\nVmPeak:\t  90000 kB\nVmRSS:\t   2048 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(2048 * 1024));
        assert_eq!(parse_vm_rss("Name:\ttaskpilot\n"), None);
    }
}
