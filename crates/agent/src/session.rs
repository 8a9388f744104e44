//! The task session loop.
//!
//! One [`Task`] drives one conversation:
//!
//! 1. **Send** the accumulated user content and the API history to the provider
//! 2. **Stream** chunks into the block processor, which shows text and runs tools
//! 3. **Collect** the tool results as the next user turn
//! 4. **Repeat** until the operator accepts a completion, the task is aborted,
//!    the stream fails, or the model returns nothing at all
//!
//! The host drives a task through a cloneable [`TaskHandle`]: it answers asks,
//! approves commands, aborts, and watches the task state.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use taskpilot_config::TaskConfig;
use taskpilot_core::command::Extensions;
use taskpilot_core::display::{AskResponse, AskType, DisplayKind, DisplayMessage, DisplaySink, NullSink, ResponseKind, SayType};
use taskpilot_core::error::{Error, Result, StorageError};
use taskpilot_core::event::{DomainEvent, EventBus};
use taskpilot_core::message::{user_content, ApiMessage, ContentPart, Role, TaskId};
use taskpilot_core::provider::{ApiChunk, ApiStream, Provider, UsageTotals};
use taskpilot_core::storage::TaskStore;
use taskpilot_executor::CommandPipeline;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::blocks::{BlockProcessor, MistakeCounter};
use crate::cancel::{CancellationController, ExternalSession, InterruptReason};
use crate::gateway::{InteractionGateway, MessageOptions};
use crate::history::HistoryStore;
use crate::truncation::{SlidingWindow, TruncationStrategy};

/// Pushed to the model when a turn ends without a tool call.
pub const NO_TOOLS_USED: &str = "[ERROR] You did not use a tool in your previous response! \
Please retry with a tool use. If you have completed the user's task, use the attempt_completion tool. \
If you require additional information from the user, ask a follow-up question.";

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Requesting,
    Streaming,
    Dispatching,
    Executing,
    Completed,
    Aborted,
}

/// How a run of the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The operator accepted a completion
    Completed,
    /// The task was aborted; it cannot continue in this instance
    Aborted,
    /// The stream was cut short; the task can be resumed from its checkpoint
    Interrupted(InterruptReason),
    /// The model returned no content at all
    EmptyResponse,
}

/// An operator's decision on a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve { feedback: Option<String> },
    Deny { feedback: Option<String> },
}

impl From<ApprovalDecision> for AskResponse {
    fn from(decision: ApprovalDecision) -> Self {
        let (kind, text) = match decision {
            ApprovalDecision::Approve { feedback } => (ResponseKind::Yes, feedback),
            ApprovalDecision::Deny { feedback } => (ResponseKind::No, feedback),
        };
        AskResponse { kind, text, images: Vec::new() }
    }
}

enum Step {
    Continue(Vec<ContentPart>),
    Finished(TaskOutcome),
}

/// Builds a [`Task`] with its per-task collaborators.
pub struct TaskBuilder {
    id: Option<TaskId>,
    provider: Arc<dyn Provider>,
    pipeline: CommandPipeline,
    config: TaskConfig,
    system_prompt: String,
    sink: Arc<dyn DisplaySink>,
    store: Option<Arc<dyn TaskStore>>,
    events: Arc<EventBus>,
    truncation: Box<dyn TruncationStrategy>,
    extensions: Extensions,
}

impl TaskBuilder {
    pub fn new(provider: Arc<dyn Provider>, pipeline: CommandPipeline) -> Self {
        Self {
            id: None,
            provider,
            pipeline,
            config: TaskConfig::default(),
            system_prompt: String::new(),
            sink: Arc::new(NullSink),
            store: None,
            events: Arc::new(EventBus::default()),
            truncation: Box::new(SlidingWindow),
            extensions: Extensions::new(),
        }
    }

    /// Reuse an existing id, e.g. to resume a stored task.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_truncation(mut self, strategy: Box<dyn TruncationStrategy>) -> Self {
        self.truncation = strategy;
        self
    }

    /// Host services visible to executors through the execution context.
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn build(self) -> Task {
        let id = self.id.unwrap_or_default();
        let history = Arc::new(HistoryStore::new(id.clone()));
        let cancel = Arc::new(CancellationController::new(id.clone()));
        let gateway = Arc::new(InteractionGateway::new(history.clone(), self.sink, cancel.clone()));
        let mistakes = Arc::new(MistakeCounter::default());
        let state = Arc::new(watch::channel(TaskState::Idle).0);
        let processor = BlockProcessor::new(
            id.clone(),
            gateway.clone(),
            Arc::new(self.pipeline),
            cancel.clone(),
            self.config.clone(),
        )
        .with_events(self.events.clone())
        .with_extensions(Arc::new(self.extensions))
        .with_mistakes(mistakes.clone())
        .with_state(state.clone());

        Task {
            id,
            config: self.config,
            system_prompt: self.system_prompt,
            provider: self.provider,
            store: self.store,
            events: self.events,
            truncation: self.truncation,
            history,
            gateway,
            processor,
            cancel,
            mistakes,
            state,
            last_usage: None,
            turns: 0,
            turn_open: false,
            interrupted: false,
        }
    }
}

/// One agent conversation.
pub struct Task {
    id: TaskId,
    config: TaskConfig,
    system_prompt: String,
    provider: Arc<dyn Provider>,
    store: Option<Arc<dyn TaskStore>>,
    events: Arc<EventBus>,
    truncation: Box<dyn TruncationStrategy>,
    history: Arc<HistoryStore>,
    gateway: Arc<InteractionGateway>,
    processor: BlockProcessor,
    cancel: Arc<CancellationController>,
    mistakes: Arc<MistakeCounter>,
    state: Arc<watch::Sender<TaskState>>,
    /// Usage of the previous request; gates truncation
    last_usage: Option<UsageTotals>,
    turns: u32,
    /// The current assistant turn is not yet in the API history
    turn_open: bool,
    /// `abort_stream` already ran for the current turn
    interrupted: bool,
}

impl Task {
    pub fn builder(provider: Arc<dyn Provider>, pipeline: CommandPipeline) -> TaskBuilder {
        TaskBuilder::new(provider, pipeline)
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id.clone(),
            gateway: self.gateway.clone(),
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn api_history(&self) -> Vec<ApiMessage> {
        self.history.api_history()
    }

    pub fn display_history(&self) -> Vec<DisplayMessage> {
        self.history.display_history()
    }

    pub fn consecutive_mistakes(&self) -> u32 {
        self.mistakes.get()
    }

    /// Start a new task from the operator's request.
    pub async fn start(&mut self, task: &str, images: Vec<String>) -> Result<TaskOutcome> {
        info!(task_id = %self.id, provider = self.provider.name(), model = %self.provider.model().id, "Starting task");
        self.publish_started(false);

        if let Err(e) = self.gateway.say(SayType::Task, task, images.clone(), MessageOptions::default()) {
            return self.finish_with_error(e).await;
        }
        let content = user_content(format!("<task>\n{task}\n</task>"), &images);
        self.run_loop(content).await
    }

    /// Resume a stored task, optionally with new instructions.
    pub async fn resume(&mut self, text: Option<&str>, images: Vec<String>) -> Result<TaskOutcome> {
        let store = self.store.clone().ok_or_else(|| Error::Config {
            message: "resuming a task requires a task store".into(),
        })?;
        let snapshot = store
            .load(&self.id)
            .await?
            .ok_or_else(|| StorageError::ReadFailed {
                task_id: self.id.to_string(),
                reason: "no saved state for this task".into(),
            })?;
        info!(
            task_id = %self.id,
            api_messages = snapshot.api_history.len(),
            display_messages = snapshot.display_history.len(),
            "Resuming task"
        );
        self.publish_started(true);

        let mut display = snapshot.display_history;
        while display.last().is_some_and(|m| {
            matches!(
                m.kind,
                DisplayKind::Ask(AskType::ResumeTask | AskType::ResumeCompletedTask)
            )
        }) {
            display.pop();
        }
        for message in display.iter_mut().filter(|m| m.partial) {
            message.partial = false;
            message.revision += 1;
        }
        let completed = display
            .last()
            .is_some_and(|m| m.kind == DisplayKind::Ask(AskType::CompletionResult));
        let ago = display.last().map(|m| elapsed_since(m.ts)).unwrap_or_else(|| "recently".into());
        self.last_usage = recover_usage(&display);
        self.history.overwrite_display(display)?;

        let mut api = snapshot.api_history;
        let mut content = match api.last() {
            Some(last) if last.role == Role::User => api.pop().map(|m| m.content).unwrap_or_default(),
            _ => Vec::new(),
        };
        self.history.overwrite_api(api)?;

        let resume_ask = if completed { AskType::ResumeCompletedTask } else { AskType::ResumeTask };
        self.gateway.ask(resume_ask, "", MessageOptions::no_return()).await?;
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        if let Some(text) = text {
            self.gateway
                .say(SayType::UserFeedback, text, images.clone(), MessageOptions::default())?;
        }

        let mut notice = if completed {
            format!("[TASK RESUMPTION] This task was interrupted {ago}. It was already marked complete.")
        } else {
            format!(
                "[TASK RESUMPTION] This task was interrupted {ago}. It may or may not be complete, \
                 so reassess the task context. The project state may have changed since then. \
                 If the last tool use has no result, assume it did not run."
            )
        };
        if let Some(text) = text {
            notice.push_str(&format!(
                "\n\nNew instructions for task continuation:\n<user_message>\n{text}\n</user_message>"
            ));
        }
        content.push(ContentPart::text(notice));
        content.extend(images.iter().map(ContentPart::image));

        self.run_loop(content).await
    }

    fn publish_started(&self, resumed: bool) {
        self.events.publish(DomainEvent::TaskStarted {
            task_id: self.id.to_string(),
            resumed,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn run_loop(&mut self, mut content: Vec<ContentPart>) -> Result<TaskOutcome> {
        loop {
            match self.run_turn(content).await {
                Ok(Step::Continue(next)) => content = next,
                Ok(Step::Finished(outcome)) => return Ok(self.settle(outcome)),
                Err(e) => return self.finish_with_error(e).await,
            }
        }
    }

    fn settle(&self, outcome: TaskOutcome) -> TaskOutcome {
        let state = match outcome {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Aborted => TaskState::Aborted,
            _ => TaskState::Idle,
        };
        self.state.send_replace(state);
        info!(task_id = %self.id, outcome = ?outcome, turns = self.turns, "Task loop ended");
        outcome
    }

    async fn finish_with_error(&mut self, error: Error) -> Result<TaskOutcome> {
        if error.is_aborted() {
            self.abort_stream(InterruptReason::UserCancelled).await;
            return Ok(self.settle(TaskOutcome::Aborted));
        }
        error!(task_id = %self.id, error = %error, "Task loop failed");
        self.abort_stream(InterruptReason::StreamingFailed).await;
        self.state.send_replace(TaskState::Idle);
        Err(error)
    }

    async fn run_turn(&mut self, mut content: Vec<ContentPart>) -> Result<Step> {
        self.cancel.check()?;
        self.interrupted = false;

        let limit = self.config.max_consecutive_mistakes;
        if self.mistakes.get() >= limit {
            warn!(task_id = %self.id, mistakes = self.mistakes.get(), "Mistake limit reached");
            let response = self
                .gateway
                .ask(
                    AskType::MistakeLimitReached,
                    format!("The model made {limit} consecutive mistakes. Provide guidance, or proceed to let it try again."),
                    MessageOptions::default(),
                )
                .await?;
            if let Some(response) = response {
                if let Some(feedback) = response.feedback() {
                    self.gateway.say(
                        SayType::UserFeedback,
                        feedback,
                        response.images.clone(),
                        MessageOptions::default(),
                    )?;
                    content.push(ContentPart::text(format!(
                        "You seem to be having trouble proceeding. The user has provided the following feedback to help guide you:\n<feedback>\n{feedback}\n</feedback>"
                    )));
                    content.extend(response.images.iter().map(ContentPart::image));
                }
            }
            self.mistakes.reset();
        }

        self.turns += 1;
        self.state.send_replace(TaskState::Requesting);
        let request = self.gateway.say(
            SayType::ApiReqStarted,
            json!({ "turn": self.turns }).to_string(),
            Vec::new(),
            MessageOptions::partial(true),
        )?;
        self.history.append_api(ApiMessage::user(content))?;
        self.checkpoint().await?;
        self.truncate_if_needed()?;

        self.events.publish(DomainEvent::ApiRequestStarted {
            task_id: self.id.to_string(),
            turn: self.turns,
            history_len: self.history.api_len(),
            timestamp: chrono::Utc::now(),
        });
        self.processor.reset();
        self.turn_open = true;

        let Some(mut stream) = self.open_stream().await? else {
            self.abort_stream(InterruptReason::StreamingFailed).await;
            return Ok(Step::Finished(TaskOutcome::Interrupted(InterruptReason::StreamingFailed)));
        };
        self.state.send_replace(TaskState::Streaming);

        let mut usage = UsageTotals::default();
        let mut saw_usage = false;
        let mut reasoning = String::new();
        let mut reasoning_ts: Option<i64> = None;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancel.error()),
                item = stream.next() => item,
            };
            let Some(item) = item else { break };

            match item {
                Ok(ApiChunk::Usage(chunk)) => {
                    usage.add(&chunk);
                    saw_usage = true;
                }
                Ok(ApiChunk::Reasoning { delta }) => {
                    reasoning.push_str(&delta);
                    match reasoning_ts {
                        Some(ts) => {
                            self.gateway.update(ts, reasoning.clone(), true)?;
                        }
                        None => {
                            let record = self.gateway.say(
                                SayType::Reasoning,
                                reasoning.clone(),
                                Vec::new(),
                                MessageOptions::partial(true),
                            )?;
                            reasoning_ts = Some(record.ts);
                        }
                    }
                }
                Ok(ApiChunk::Text { delta }) => {
                    if let Some(ts) = reasoning_ts.take() {
                        self.gateway.finish(ts, std::mem::take(&mut reasoning))?;
                    }
                    self.processor.push_chunk(&delta);
                    self.processor.present().await?;
                }
                Err(e) => {
                    error!(task_id = %self.id, error = %e, "Stream failed mid-response");
                    self.gateway.say(SayType::Error, e.to_string(), Vec::new(), MessageOptions::default())?;
                    self.abort_stream(InterruptReason::StreamingFailed).await;
                    return Ok(Step::Finished(TaskOutcome::Interrupted(InterruptReason::StreamingFailed)));
                }
            }
        }

        if let Some(ts) = reasoning_ts {
            self.gateway.finish(ts, reasoning)?;
        }
        self.processor.finish_stream();
        self.processor.present().await?;

        if saw_usage {
            self.last_usage = Some(usage);
        }
        let mut record = serde_json::to_value(usage)?;
        record["turn"] = json!(self.turns);
        self.gateway.finish(request.ts, record.to_string())?;

        let text = self.processor.raw_text();
        if text.trim().is_empty() {
            warn!(task_id = %self.id, turn = self.turns, "Model returned no assistant content");
            self.turn_open = false;
            self.gateway.say(
                SayType::Error,
                "The model returned no assistant messages. This may indicate a provider issue or an output limit.",
                Vec::new(),
                MessageOptions::default(),
            )?;
            self.history
                .append_api(ApiMessage::assistant("Failure: I did not provide a response."))?;
            self.checkpoint().await?;
            return Ok(Step::Finished(TaskOutcome::EmptyResponse));
        }

        self.history.append_api(ApiMessage::assistant(text))?;
        self.turn_open = false;
        let output = self.processor.take_output();
        self.checkpoint().await?;

        if output.completed {
            self.events.publish(DomainEvent::TaskCompleted {
                task_id: self.id.to_string(),
                turns: self.turns,
                timestamp: chrono::Utc::now(),
            });
            return Ok(Step::Finished(TaskOutcome::Completed));
        }
        if output.tool_used {
            return Ok(Step::Continue(output.user_content));
        }
        self.next_input_without_tool().await
    }

    /// Decide the next input after a turn that used no tool.
    async fn next_input_without_tool(&mut self) -> Result<Step> {
        if self.config.require_tool_use {
            let mistakes = self.mistakes.increment();
            debug!(task_id = %self.id, mistakes, "Turn ended without a tool call");
            return Ok(Step::Continue(vec![ContentPart::text(NO_TOOLS_USED)]));
        }

        self.state.send_replace(TaskState::Idle);
        let response = self
            .gateway
            .ask(AskType::Followup, "", MessageOptions::default())
            .await?;
        let Some(response) = response else {
            return Ok(Step::Finished(TaskOutcome::Completed));
        };
        match response.feedback() {
            Some(feedback) => {
                self.gateway.say(
                    SayType::UserFeedback,
                    feedback,
                    response.images.clone(),
                    MessageOptions::default(),
                )?;
                Ok(Step::Continue(user_content(feedback, &response.images)))
            }
            None => Ok(Step::Finished(TaskOutcome::Completed)),
        }
    }

    fn truncate_if_needed(&mut self) -> Result<()> {
        let Some(usage) = self.last_usage else {
            return Ok(());
        };
        let threshold = self.config.truncation_threshold();
        if usage.context_tokens() < threshold {
            return Ok(());
        }
        // Spent: only a fresh usage report may trigger the next truncation
        self.last_usage = None;

        let before = self.history.api_len();
        if self.history.truncate(self.truncation.as_ref())? {
            let after = self.history.api_len();
            info!(task_id = %self.id, used = usage.context_tokens(), threshold, before, after, "Truncated API history");
            self.events.publish(DomainEvent::HistoryTruncated {
                task_id: self.id.to_string(),
                before,
                after,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }

    /// Open a stream whose first chunk arrived.
    ///
    /// Returns `None` when the operator declines to retry a failed request.
    async fn open_stream(&mut self) -> Result<Option<ApiStream>> {
        let mut attempt: u32 = 0;
        loop {
            self.cancel.check()?;
            let history = self.history.api_history();
            let failure = match self.provider.send(&self.system_prompt, &history).await {
                Ok(mut stream) => match stream.next().await {
                    Some(Ok(first)) => {
                        return Ok(Some(futures::stream::iter([Ok(first)]).chain(stream).boxed()));
                    }
                    None => return Ok(Some(stream)),
                    Some(Err(e)) => e,
                },
                Err(e) => e,
            };
            warn!(task_id = %self.id, attempt, error = %failure, "Request failed before the first chunk");

            if self.config.auto_retry_requests && failure.is_retryable() && attempt < self.config.max_auto_retries {
                attempt += 1;
                let delay = Duration::from_secs(
                    self.config
                        .retry_base_delay_secs
                        .saturating_mul(2u64.saturating_pow(attempt - 1)),
                );
                self.gateway.say(
                    SayType::ApiReqRetried,
                    format!(
                        "{failure}\nRetrying in {}s (attempt {attempt}/{})",
                        delay.as_secs(),
                        self.config.max_auto_retries
                    ),
                    Vec::new(),
                    MessageOptions::default(),
                )?;
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(self.cancel.error()),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            let response = self
                .gateway
                .ask(AskType::ApiReqFailed, failure.to_string(), MessageOptions::default())
                .await?;
            match response {
                Some(r) if r.kind == ResponseKind::Yes => {
                    self.gateway
                        .say(SayType::ApiReqRetried, "", Vec::new(), MessageOptions::default())?;
                    attempt = 0;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Close out an interrupted stream so the task can resume from its checkpoint.
    ///
    /// Runs at most once per turn: open partial records are finalized, the
    /// partial assistant turn is recorded with an interruption annotation,
    /// and state is persisted. A user cancellation also freezes the history.
    async fn abort_stream(&mut self, reason: InterruptReason) {
        if self.interrupted {
            return;
        }
        self.interrupted = true;

        for message in self.history.finalize_partials() {
            self.gateway.publish(&message);
        }

        if self.turn_open {
            self.turn_open = false;
            let partial = self.processor.raw_text();
            let annotation = reason.annotation();
            let text = if partial.trim().is_empty() {
                annotation.to_string()
            } else {
                format!("{partial}\n\n{annotation}")
            };
            if let Err(e) = self.history.append_api(ApiMessage::assistant(text)) {
                warn!(task_id = %self.id, error = %e, "Could not record interrupted turn");
            }
            self.events.publish(DomainEvent::StreamInterrupted {
                task_id: self.id.to_string(),
                reason: reason.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        info!(task_id = %self.id, reason = %reason, "Stream aborted");

        if let Err(e) = self.checkpoint().await {
            warn!(task_id = %self.id, error = %e, "Checkpoint after abort failed");
        }
        if reason == InterruptReason::UserCancelled {
            self.history.freeze();
        }
    }

    async fn checkpoint(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .save(&self.id, &self.history.api_history(), &self.history.display_history())
            .await?;
        Ok(())
    }
}

/// The host's side of a running task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    gateway: Arc<InteractionGateway>,
    cancel: Arc<CancellationController>,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Answer the live ask.
    pub fn respond(&self, response: AskResponse) -> bool {
        self.gateway.respond(response)
    }

    /// Answer the ask carrying this correlation id.
    pub fn receive_answer(&self, correlation_id: &str, response: AskResponse) -> bool {
        self.gateway.receive_answer(correlation_id, response)
    }

    /// Approve or deny the command waiting for approval.
    pub fn receive_approval(&self, decision: ApprovalDecision) -> bool {
        self.gateway.respond_to(AskType::Tool, decision.into())
    }

    /// Type and correlation id of the live ask.
    pub fn pending_ask(&self) -> Option<(AskType, Option<String>)> {
        self.gateway.pending_ask()
    }

    pub async fn abort_task(&self) {
        self.cancel.abort_task().await;
    }

    /// Abort and mark the task as dropped by the host.
    pub async fn abandon(&self) {
        self.cancel.abandon().await;
    }

    pub fn register_session(&self, session: Arc<dyn ExternalSession>) {
        self.cancel.register_session(session);
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }
}

/// Usage of the last finished request recorded in the display history.
fn recover_usage(display: &[DisplayMessage]) -> Option<UsageTotals> {
    display
        .iter()
        .rev()
        .filter(|m| m.kind == DisplayKind::Say(SayType::ApiReqStarted))
        .find_map(|m| serde_json::from_str::<UsageTotals>(&m.text).ok())
        .filter(|usage| usage.context_tokens() > 0)
}

fn elapsed_since(ts: i64) -> String {
    let Some(then) = chrono::DateTime::from_timestamp_millis(ts) else {
        return "recently".into();
    };
    let minutes = (chrono::Utc::now() - then).num_minutes();
    match minutes {
        m if m < 1 => "just now".into(),
        m if m < 60 => format!("{m} minutes ago"),
        m if m < 60 * 24 => format!("{} hours ago", m / 60),
        m => format!("{} days ago", m / (60 * 24)),
    }
}
