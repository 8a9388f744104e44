//! End-to-end tests of the task session loop against a scripted provider.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskpilot_agent::{
    ApprovalDecision, ExternalSession, InterruptReason, Task, TaskHandle, TaskOutcome, TaskState, NO_TOOLS_USED,
};
use taskpilot_config::TaskConfig;
use taskpilot_core::display::ChannelSink;
use taskpilot_core::{
    ApiChunk, ApiMessage, ApiStream, AskResponse, AskType, Command, CommandExecutor, CommandResult, DisplayKind,
    DomainEvent, EventBus, ExecutionContext, ModelInfo, Provider, ProviderError, Role, SayType, TaskId, TaskStore,
    ToolError, UsageTotals,
};
use taskpilot_executor::{CachingMiddleware, CommandPipeline};
use taskpilot_storage::InMemoryTaskStore;

// --- Scripted provider ---

enum Script {
    /// Stream these items, then end
    Stream(Vec<Result<ApiChunk, ProviderError>>),
    /// Stream these chunks, then never produce another
    Hang(Vec<ApiChunk>),
    /// Fail the request itself
    Fail(ProviderError),
}

struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ApiMessage>>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Vec<ApiMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> ModelInfo {
        ModelInfo { id: "scripted-model".into(), context_window: 128_000 }
    }

    async fn send(&self, _system_prompt: &str, history: &[ApiMessage]) -> Result<ApiStream, ProviderError> {
        self.requests.lock().unwrap().push(history.to_vec());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Stream(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(Script::Hang(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Some(Script::Fail(error)) => Err(error),
            None => Ok(futures::stream::empty().boxed()),
        }
    }
}

fn text(chunks: &[&str]) -> Script {
    Script::Stream(chunks.iter().map(|c| Ok(ApiChunk::text(*c))).collect())
}

fn with_usage(chunks: &[&str], tokens_in: u64) -> Script {
    let mut items: Vec<_> = chunks.iter().map(|c| Ok(ApiChunk::text(*c))).collect();
    items.push(Ok(ApiChunk::Usage(UsageTotals { tokens_in, ..Default::default() })));
    Script::Stream(items)
}

const READ_A: &str = "Reading a.\n<read_file>\n<path>a.rs</path>\n</read_file>";
const COMPLETE: &str = "<attempt_completion>\n<result>Done.</result>\n</attempt_completion>";

// --- Host side ---

struct ReadFile {
    calls: AtomicUsize,
}

#[async_trait]
impl CommandExecutor for ReadFile {
    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, command: &Command, _ctx: &ExecutionContext) -> Result<CommandResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CommandResult::success(format!("fn main() {{}} // {}", command.param("path").unwrap_or_default())))
    }
}

struct Fixture {
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryTaskStore>,
    events: Arc<EventBus>,
    reader: Arc<ReadFile>,
    task: Task,
}

fn fixture(scripts: Vec<Script>, config: TaskConfig) -> Fixture {
    fixture_with_store(scripts, config, Arc::new(InMemoryTaskStore::new()), TaskId::new())
}

fn fixture_with_store(scripts: Vec<Script>, config: TaskConfig, store: Arc<InMemoryTaskStore>, id: TaskId) -> Fixture {
    let provider = ScriptedProvider::new(scripts);
    let events = Arc::new(EventBus::default());
    let reader = Arc::new(ReadFile { calls: AtomicUsize::new(0) });
    let mut pipeline = CommandPipeline::new();
    pipeline.register("read_file", reader.clone());
    let task = Task::builder(provider.clone(), pipeline)
        .with_id(id)
        .with_config(config)
        .with_system_prompt("You are a careful engineer.")
        .with_store(store.clone())
        .with_events(events.clone())
        .build();
    Fixture { provider, store, events, reader, task }
}

fn auto_approve() -> TaskConfig {
    TaskConfig { auto_approve_all: true, ..TaskConfig::default() }
}

/// Wait until an ask of this type is live, then answer it.
async fn answer(handle: &TaskHandle, kind: AskType, response: AskResponse) {
    loop {
        if handle.pending_ask().is_some_and(|(k, _)| k == kind) && handle.respond(response.clone()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn operator(handle: TaskHandle, answers: Vec<(AskType, AskResponse)>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for (kind, response) in answers {
            answer(&handle, kind, response).await;
        }
    })
}

fn last_text(history: &[ApiMessage]) -> String {
    history.last().map(ApiMessage::text).unwrap_or_default()
}

// --- Tests ---

#[tokio::test]
async fn tool_turn_then_accepted_completion() {
    let mut f = fixture(vec![text(&["Reading a.\n<read_", "file>\n<path>a.rs</pa", "th>\n</read_file>"]), text(&[COMPLETE])], auto_approve());
    let mut events = f.events.subscribe();
    let op = operator(f.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);

    let outcome = f.task.start("Explain a.rs", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(f.task.handle().state(), TaskState::Completed);
    assert_eq!(f.reader.calls.load(Ordering::SeqCst), 1);

    let requests = f.provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0][0].text().contains("<task>\nExplain a.rs\n</task>"));
    let tool_result = last_text(&requests[1]);
    assert!(tool_result.starts_with("[read_file for 'a.rs'] Result:"));
    assert!(tool_result.contains("fn main()"));

    let api = f.task.api_history();
    assert_eq!(api.len(), 4);
    assert_eq!(api[3].role, Role::Assistant);

    let display = f.task.display_history();
    assert!(display.iter().all(|m| !m.partial));
    assert_eq!(display[0].kind, DisplayKind::Say(SayType::Task));
    let texts: Vec<_> = display.iter().filter(|m| m.kind == DisplayKind::Say(SayType::Text)).collect();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].text, "Reading a.");

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(*seen[0], DomainEvent::TaskStarted { resumed: false, .. }));
    assert!(seen.iter().any(|e| matches!(**e, DomainEvent::ToolExecuted { success: true, .. })));
    assert!(matches!(**seen.last().unwrap(), DomainEvent::TaskCompleted { turns: 2, .. }));

    let saved = f.store.load(f.task.id()).await.unwrap().unwrap();
    assert_eq!(saved.api_history.len(), 4);
}

#[tokio::test]
async fn turn_without_tool_pushes_notice() {
    let mut f = fixture(vec![text(&["I think the answer is 42."]), text(&[COMPLETE])], auto_approve());
    let op = operator(f.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);

    let outcome = f.task.start("What is the answer?", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    let requests = f.provider.requests();
    assert_eq!(last_text(&requests[1]), NO_TOOLS_USED);
    assert_eq!(f.task.consecutive_mistakes(), 0);
}

#[tokio::test]
async fn mistake_limit_asks_operator_for_guidance() {
    let config = TaskConfig { max_consecutive_mistakes: 1, ..auto_approve() };
    let mut f = fixture(vec![text(&["Hmm."]), text(&[COMPLETE])], config);
    let op = operator(
        f.task.handle(),
        vec![
            (AskType::MistakeLimitReached, AskResponse::message("Read a.rs first")),
            (AskType::CompletionResult, AskResponse::yes()),
        ],
    );

    let outcome = f.task.start("Fix the bug", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    let second = last_text(&f.provider.requests()[1]);
    assert!(second.starts_with(NO_TOOLS_USED));
    assert!(second.contains("<feedback>\nRead a.rs first\n</feedback>"));
    let display = f.task.display_history();
    assert!(display.iter().any(|m| m.kind == DisplayKind::Ask(AskType::MistakeLimitReached)));
    assert!(display.iter().any(|m| m.kind == DisplayKind::Say(SayType::UserFeedback) && m.text == "Read a.rs first"));
}

async fn history_sizes_with_usage(tokens_in: u64) -> Vec<usize> {
    history_sizes(vec![text(&[READ_A]), text(&[READ_A]), with_usage(&[READ_A], tokens_in), text(&[COMPLETE])]).await
}

async fn history_sizes(scripts: Vec<Script>) -> Vec<usize> {
    let mut f = fixture(scripts, auto_approve());
    let op = operator(f.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);
    let outcome = f.task.start("Read a.rs three times", vec![]).await.unwrap();
    op.await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);
    f.provider.requests().iter().map(Vec::len).collect()
}

#[tokio::test]
async fn history_is_truncated_once_usage_reaches_threshold() {
    // 128k window: threshold is max(88k, 102.4k)
    assert_eq!(history_sizes_with_usage(102_400).await, vec![1, 3, 5, 5]);
}

#[tokio::test]
async fn history_below_threshold_is_kept() {
    assert_eq!(history_sizes_with_usage(102_399).await, vec![1, 3, 5, 7]);
}

#[tokio::test]
async fn usage_report_truncates_only_once() {
    // The turn after the truncation reports no usage of its own
    let scripts = vec![
        text(&[READ_A]),
        text(&[READ_A]),
        with_usage(&[READ_A], 110_000),
        text(&[READ_A]),
        text(&[COMPLETE]),
    ];
    assert_eq!(history_sizes(scripts).await, vec![1, 3, 5, 5, 7]);
}

#[tokio::test]
async fn interleaved_reasoning_keeps_one_text_record() {
    let turn = Script::Stream(vec![
        Ok(ApiChunk::text("Hello")),
        Ok(ApiChunk::reasoning("hm")),
        Ok(ApiChunk::reasoning("m")),
        Ok(ApiChunk::text(" world")),
        Ok(ApiChunk::reasoning("again")),
        Ok(ApiChunk::text(". Now reading.\n<read_file><path>a.rs</path></read_file>")),
    ]);
    let mut f = fixture(vec![turn, text(&[COMPLETE])], auto_approve());
    let op = operator(f.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);

    let outcome = f.task.start("Greet, then read a.rs", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(f.reader.calls.load(Ordering::SeqCst), 1);
    let display = f.task.display_history();
    assert!(display.iter().all(|m| !m.partial));

    let texts: Vec<&str> = display
        .iter()
        .filter(|m| m.kind == DisplayKind::Say(SayType::Text))
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["Hello world. Now reading."]);

    let reasoning: Vec<&str> = display
        .iter()
        .filter(|m| m.kind == DisplayKind::Say(SayType::Reasoning))
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(reasoning, vec!["hmm", "again"]);
}

struct ListFiles {
    calls: AtomicUsize,
}

#[async_trait]
impl CommandExecutor for ListFiles {
    fn required_params(&self) -> &[&'static str] {
        &["path"]
    }

    fn cacheable(&self) -> bool {
        true
    }

    async fn execute(&self, _command: &Command, _ctx: &ExecutionContext) -> Result<CommandResult, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CommandResult::success(format!("Cargo.toml\nsrc/ (listing {n})")))
    }
}

#[tokio::test]
async fn repeated_cacheable_command_is_served_from_cache() {
    const LIST: &str = "<list_files>\n<path>.</path>\n</list_files>";
    let provider = ScriptedProvider::new(vec![text(&[LIST]), text(&[LIST]), text(&[COMPLETE])]);
    let lister = Arc::new(ListFiles { calls: AtomicUsize::new(0) });
    let mut pipeline = CommandPipeline::new();
    pipeline
        .use_middleware(Arc::new(CachingMiddleware::default()))
        .register("list_files", lister.clone());
    let mut task = Task::builder(provider.clone(), pipeline).with_config(auto_approve()).build();
    let op = operator(task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);

    let outcome = task.start("List the project twice", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    let requests = provider.requests();
    assert!(last_text(&requests[1]).contains("(listing 1)"));
    assert!(last_text(&requests[2]).contains("(listing 1)"));
}

struct Browser {
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl ExternalSession for Browser {
    fn name(&self) -> &str {
        "browser"
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn abort_mid_stream_records_interrupted_turn() {
    let (sink, mut display_rx) = ChannelSink::new();
    let provider = ScriptedProvider::new(vec![Script::Hang(vec![ApiChunk::text("Hello"), ApiChunk::text(" wor")])]);
    let store = Arc::new(InMemoryTaskStore::new());
    let mut task = Task::builder(provider, CommandPipeline::new())
        .with_sink(Arc::new(sink))
        .with_store(store.clone())
        .build();
    let handle = task.handle();
    let released = Arc::new(AtomicUsize::new(0));
    handle.register_session(Arc::new(Browser { released: released.clone() }));

    let aborter = tokio::spawn(async move {
        while let Some(message) = display_rx.recv().await {
            if message.kind == DisplayKind::Say(SayType::Text) && message.text == "Hello wor" {
                break;
            }
        }
        handle.abort_task().await;
        handle.abort_task().await;
    });

    let outcome = task.start("Say hello", vec![]).await.unwrap();
    aborter.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Aborted);
    assert_eq!(task.handle().state(), TaskState::Aborted);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let api = task.api_history();
    let interrupted: Vec<_> = api
        .iter()
        .filter(|m| m.text().contains(InterruptReason::UserCancelled.annotation()))
        .collect();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].text(), "Hello wor\n\n[Response interrupted by user]");
    assert!(task.display_history().iter().all(|m| !m.partial));

    let saved = store.load(task.id()).await.unwrap().unwrap();
    assert_eq!(last_text(&saved.api_history), "Hello wor\n\n[Response interrupted by user]");
}

#[tokio::test]
async fn stream_failure_is_resumable() {
    let store = Arc::new(InMemoryTaskStore::new());
    let id = TaskId::from("resumable");
    let failing = Script::Stream(vec![
        Ok(ApiChunk::text("Let me ")),
        Err(ProviderError::StreamInterrupted("connection reset".into())),
    ]);
    let mut f = fixture_with_store(vec![failing], auto_approve(), store.clone(), id.clone());

    let outcome = f.task.start("Refactor main", vec![]).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Interrupted(InterruptReason::StreamingFailed));
    assert_eq!(last_text(&f.task.api_history()), "Let me \n\n[Response interrupted by API Error]");
    assert!(f.task.display_history().iter().any(|m| m.kind == DisplayKind::Say(SayType::Error)));

    let mut resumed = fixture_with_store(vec![text(&[COMPLETE])], auto_approve(), store, id);
    let op = operator(resumed.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);
    let outcome = resumed.task.resume(Some("keep going"), vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    let request = &resumed.provider.requests()[0];
    assert_eq!(request.len(), 3);
    let notice = last_text(request);
    assert!(notice.starts_with("[TASK RESUMPTION]"));
    assert!(notice.contains("<user_message>\nkeep going\n</user_message>"));

    let display = resumed.task.display_history();
    assert!(display.iter().any(|m| m.kind == DisplayKind::Ask(AskType::ResumeTask)));
    assert!(display.iter().any(|m| m.kind == DisplayKind::Say(SayType::UserFeedback) && m.text == "keep going"));
}

#[tokio::test(start_paused = true)]
async fn first_chunk_failure_is_retried_automatically() {
    let config = TaskConfig { auto_retry_requests: true, ..auto_approve() };
    let scripts = vec![Script::Fail(ProviderError::Timeout("no response".into())), text(&[COMPLETE])];
    let mut f = fixture(scripts, config);
    let op = operator(f.task.handle(), vec![(AskType::CompletionResult, AskResponse::yes())]);

    let outcome = f.task.start("Do it", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(f.provider.requests().len(), 2);
    let retried: Vec<_> = f
        .task
        .display_history()
        .into_iter()
        .filter(|m| m.kind == DisplayKind::Say(SayType::ApiReqRetried))
        .collect();
    assert_eq!(retried.len(), 1);
    assert!(retried[0].text.contains("Retrying in 2s"));
}

#[tokio::test]
async fn declined_retry_interrupts_task() {
    let scripts = vec![Script::Fail(ProviderError::AuthenticationFailed("bad key".into()))];
    let mut f = fixture(scripts, TaskConfig { auto_retry_requests: true, ..auto_approve() });
    let op = operator(f.task.handle(), vec![(AskType::ApiReqFailed, AskResponse::no())]);

    let outcome = f.task.start("Do it", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Interrupted(InterruptReason::StreamingFailed));
    assert_eq!(f.provider.requests().len(), 1);
}

#[tokio::test]
async fn empty_response_ends_task() {
    let scripts = vec![Script::Stream(vec![Ok(ApiChunk::Usage(UsageTotals { tokens_in: 10, ..Default::default() }))])];
    let mut f = fixture(scripts, auto_approve());

    let outcome = f.task.start("Anything", vec![]).await.unwrap();

    assert_eq!(outcome, TaskOutcome::EmptyResponse);
    assert_eq!(last_text(&f.task.api_history()), "Failure: I did not provide a response.");
    let request = f
        .task
        .display_history()
        .into_iter()
        .find(|m| m.kind == DisplayKind::Say(SayType::ApiReqStarted))
        .unwrap();
    assert!(!request.partial);
    assert!(request.text.contains("\"tokens_in\":10"));
}

#[tokio::test]
async fn command_waits_for_operator_approval() {
    let mut f = fixture(vec![text(&[READ_A]), text(&[COMPLETE])], TaskConfig::default());
    let handle = f.task.handle();
    let op = tokio::spawn(async move {
        loop {
            if handle.pending_ask().is_some_and(|(k, id)| k == AskType::Tool && id.is_some())
                && handle.receive_approval(ApprovalDecision::Approve { feedback: None })
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        answer(&handle, AskType::CompletionResult, AskResponse::yes()).await;
    });

    let outcome = f.task.start("Read a.rs", vec![]).await.unwrap();
    op.await.unwrap();

    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(f.reader.calls.load(Ordering::SeqCst), 1);
    let ask = f
        .task
        .display_history()
        .into_iter()
        .find(|m| m.kind == DisplayKind::Ask(AskType::Tool))
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(&ask.text).unwrap();
    assert_eq!(payload["tool"], "read_file");
    assert!(payload["approval_id"].is_string());
}

#[tokio::test]
async fn state_is_observable_while_waiting() {
    let mut f = fixture(vec![text(&[COMPLETE])], auto_approve());
    let handle = f.task.handle();
    let mut states = handle.watch_state();
    let op = tokio::spawn(async move {
        answer(&handle, AskType::CompletionResult, AskResponse::yes()).await;
    });

    f.task.start("Finish", vec![]).await.unwrap();
    op.await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), TaskState::Completed);
}
