//! `taskpilot replay`: run a task against a recorded transcript.
//!
//! Each transcript turn is streamed to the task session in small chunks,
//! exactly as a live provider would deliver it, so parsing, approval, command
//! execution, cancellation and persistence all behave as they do in a real
//! session.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskpilot_agent::{Task, TaskHandle, TaskOutcome};
use taskpilot_config::{AppConfig, ExecutorConfig};
use taskpilot_core::command::{Command, CommandExecutor, CommandResult, ExecutionContext};
use taskpilot_core::display::{AskResponse, AskType, DisplayMessage, DisplaySink};
use taskpilot_core::error::{ProviderError, ToolError};
use taskpilot_core::message::{ApiMessage, TaskId};
use taskpilot_core::provider::{ApiChunk, ApiStream, ModelInfo, Provider, UsageTotals};
use taskpilot_executor::{
    CachingMiddleware, CommandPipeline, LoggingMiddleware, PerformanceMiddleware, RetryMiddleware,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::history::format_record;
use super::store;

pub struct ReplayOptions {
    pub transcript: PathBuf,
    pub task: String,
    pub resume: Option<String>,
    pub auto_approve: bool,
    pub chunk_size: usize,
}

pub async fn run(options: ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if options.auto_approve {
        config.task.auto_approve_all = true;
    }

    let text = tokio::fs::read_to_string(&options.transcript)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", options.transcript.display()))?;
    let turns = parse_transcript(&text);
    if turns.is_empty() {
        return Err(format!("{} contains no turns", options.transcript.display()).into());
    }
    info!(turns = turns.len(), transcript = %options.transcript.display(), "Loaded transcript");

    let provider = Arc::new(TranscriptProvider::new(&config.default_model, config.task.context_window, turns, options.chunk_size));
    let mut builder = Task::builder(provider, build_pipeline(&config.executor))
        .with_config(config.task.clone())
        .with_sink(Arc::new(TerminalSink))
        .with_store(store::open(&config.storage));
    if let Some(prompt) = &config.system_prompt {
        builder = builder.with_system_prompt(prompt.clone());
    }
    if let Some(id) = &options.resume {
        builder = builder.with_id(TaskId::from(id.as_str()));
    }
    let mut task = builder.build();
    let handle = task.handle();
    println!("Task {}", task.id());

    let operator = tokio::spawn(operate(handle.clone(), options.auto_approve));
    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nAborting task...");
                handle.abort_task().await;
            }
        })
    };

    let outcome = match &options.resume {
        Some(_) => task.resume(None, Vec::new()).await,
        None => task.start(&options.task, Vec::new()).await,
    };
    operator.abort();
    interrupt.abort();

    match outcome? {
        TaskOutcome::Completed => println!("\nTask completed."),
        TaskOutcome::Aborted => println!("\nTask aborted."),
        TaskOutcome::Interrupted(reason) => {
            println!("\nTask interrupted ({reason}). Resume with: taskpilot replay <transcript> --resume {}", task.id())
        }
        TaskOutcome::EmptyResponse => println!("\nThe transcript ran out of turns."),
    }
    Ok(())
}

/// Split a transcript into assistant turns at `---` lines.
pub fn parse_transcript(text: &str) -> Vec<String> {
    let mut turns = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim() == "---" {
            turns.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    turns.push(current);
    turns
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
}

/// Roughly four characters per token.
fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}

/// Serves recorded turns in order. Once they run out it streams nothing.
pub struct TranscriptProvider {
    model: String,
    context_window: u64,
    turns: Mutex<VecDeque<String>>,
    chunk_size: usize,
}

impl TranscriptProvider {
    pub fn new(model: &str, context_window: u64, turns: Vec<String>, chunk_size: usize) -> Self {
        Self {
            model: model.to_string(),
            context_window,
            turns: Mutex::new(turns.into()),
            chunk_size,
        }
    }
}

#[async_trait]
impl Provider for TranscriptProvider {
    fn name(&self) -> &str {
        "transcript"
    }

    fn model(&self) -> ModelInfo {
        ModelInfo {
            id: self.model.clone(),
            context_window: self.context_window,
        }
    }

    async fn send(&self, system_prompt: &str, history: &[ApiMessage]) -> Result<ApiStream, ProviderError> {
        let turn = self
            .turns
            .lock()
            .map_err(|_| ProviderError::StreamInterrupted("transcript lock poisoned".into()))?
            .pop_front();
        let Some(turn) = turn else {
            debug!("Transcript exhausted");
            return Ok(futures::stream::empty().boxed());
        };

        let prompt_chars = system_prompt.len() + history.iter().map(|m| m.text().len()).sum::<usize>();
        let usage = UsageTotals {
            tokens_in: estimate_tokens(prompt_chars),
            tokens_out: estimate_tokens(turn.len()),
            ..Default::default()
        };
        let mut items: Vec<Result<ApiChunk, ProviderError>> =
            chunks(&turn, self.chunk_size).into_iter().map(|c| Ok(ApiChunk::text(c))).collect();
        items.push(Ok(ApiChunk::Usage(usage)));

        Ok(futures::stream::iter(items)
            .then(|item| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                item
            })
            .boxed())
    }
}

/// Prints every finalized display record.
struct TerminalSink;

impl DisplaySink for TerminalSink {
    fn notify(&self, message: &DisplayMessage) {
        if !message.partial {
            println!("{}", format_record(message));
        }
    }
}

pub fn build_pipeline(config: &ExecutorConfig) -> CommandPipeline {
    let mut pipeline = CommandPipeline::new();
    if config.logging {
        pipeline.use_middleware(Arc::new(LoggingMiddleware));
    }
    if config.performance {
        pipeline.use_middleware(Arc::new(PerformanceMiddleware::new()));
    }
    pipeline
        .use_middleware(Arc::new(CachingMiddleware::new(Duration::from_secs(config.cache_ttl_secs))))
        .use_middleware(Arc::new(RetryMiddleware::new(
            config.retry_max,
            Duration::from_millis(config.retry_delay_ms),
        )))
        .register("read_file", Arc::new(ReadFile))
        .register("list_files", Arc::new(ListFiles));
    pipeline
}

struct ReadFile;

#[async_trait]
impl CommandExecutor for ReadFile {
    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, command: &Command, _ctx: &ExecutionContext) -> Result<CommandResult, ToolError> {
        let path = command.param("path").unwrap_or_default();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: command.kind.clone(),
            reason: format!("{path}: {e}"),
        })?;
        let bytes = content.len();
        Ok(CommandResult::success(content).with_metadata("bytes", bytes))
    }
}

struct ListFiles;

#[async_trait]
impl CommandExecutor for ListFiles {
    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, command: &Command, _ctx: &ExecutionContext) -> Result<CommandResult, ToolError> {
        let path = command.param("path").unwrap_or_default();
        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: command.kind.clone(),
            reason: format!("{path}: {e}"),
        };
        let mut entries = tokio::fs::read_dir(path).await.map_err(failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(failed)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(CommandResult::success(names.join("\n")))
    }
}

/// Answer asks from stdin, or approve everything when `auto` is set.
async fn operate(handle: TaskHandle, auto: bool) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let Some((kind, _)) = handle.pending_ask() else {
            continue;
        };

        let response = if auto {
            AskResponse::yes()
        } else {
            println!("{}", prompt(kind));
            match lines.next_line().await {
                Ok(Some(line)) => parse_answer(&line),
                _ => return,
            }
        };
        if !handle.respond(response) {
            debug!(ask = ?kind, "Ask was resolved before the answer arrived");
        }
    }
}

fn prompt(kind: AskType) -> &'static str {
    match kind {
        AskType::Tool => "Run this command? [y]es / [n]o / or type feedback",
        AskType::CompletionResult => "Accept the result? [y]es / or type feedback",
        AskType::ApiReqFailed => "The request failed. Retry? [y]es / [n]o",
        AskType::MistakeLimitReached => "The model is struggling. Type guidance, or [y] to let it continue",
        AskType::Followup => "Reply to the model, or [y] to finish",
        AskType::ResumeTask | AskType::ResumeCompletedTask => "Resume the task? [y]es / [n]o",
    }
}

fn parse_answer(line: &str) -> AskResponse {
    match line.trim() {
        "" | "y" | "yes" => AskResponse::yes(),
        "n" | "no" => AskResponse::no(),
        text => AskResponse::message(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpilot_core::display::ResponseKind;

    #[test]
    fn transcript_splits_on_separator_lines() {
        let turns = parse_transcript("First turn\n<read_file>\n<path>a</path>\n</read_file>\n---\n\n  ---  \nSecond\n");
        assert_eq!(turns, vec!["First turn\n<read_file>\n<path>a</path>\n</read_file>", "Second"]);
    }

    #[test]
    fn chunks_cover_text_on_char_boundaries() {
        let parts = chunks("héllo wörld", 3);
        assert_eq!(parts.concat(), "héllo wörld");
        assert!(parts.iter().all(|p| p.chars().count() <= 3));
    }

    #[test]
    fn answers_map_to_responses() {
        assert_eq!(parse_answer("").kind, ResponseKind::Yes);
        assert_eq!(parse_answer(" n ").kind, ResponseKind::No);
        let feedback = parse_answer("use the other file");
        assert_eq!(feedback.feedback(), Some("use the other file"));
    }

    #[test]
    fn pipeline_follows_executor_config() {
        let pipeline = build_pipeline(&ExecutorConfig::default());
        assert_eq!(pipeline.middleware_names(), vec!["logging", "caching", "retry"]);
        assert_eq!(pipeline.registry().kinds(), vec!["list_files", "read_file"]);

        let config = ExecutorConfig { logging: false, performance: true, ..ExecutorConfig::default() };
        assert_eq!(build_pipeline(&config).middleware_names(), vec!["performance", "caching", "retry"]);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_streams_turns_then_nothing() {
        let provider = TranscriptProvider::new("m", 1000, vec!["Hello there".into()], 4);
        let items: Vec<_> = provider.send("", &[]).await.unwrap().collect().await;
        let text: String = items
            .iter()
            .filter_map(|i| match i {
                Ok(ApiChunk::Text { delta }) => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello there");
        assert!(matches!(items.last(), Some(Ok(ApiChunk::Usage(u))) if u.tokens_out == 3));

        let rest: Vec<_> = provider.send("", &[]).await.unwrap().collect().await;
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn read_file_reports_missing_files() {
        let ctx = ExecutionContext::new(TaskId::from("t"));
        let command = Command::new("read_file").with_param("path", "/definitely/not/here");
        let err = ReadFile.execute(&command, &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
