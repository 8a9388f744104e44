//! Block processor: presents parsed content blocks as they stabilize.
//!
//! Text blocks are shown through the gateway. Each finalized tool block is
//! dispatched exactly once to the command pipeline, and only the first tool
//! of an assistant turn is executed. Presentation is single-flight: a call
//! that finds another presentation in progress only flags that new content
//! arrived, and the running presentation picks it up before returning.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use taskpilot_config::TaskConfig;
use taskpilot_core::command::{Command, CommandExecutor, CommandStatus, ExecutionContext, Extensions};
use taskpilot_core::display::{AskType, ResponseKind, SayType};
use taskpilot_core::error::Result;
use taskpilot_core::event::{DomainEvent, EventBus};
use taskpilot_core::message::{ContentPart, TaskId};
use taskpilot_executor::CommandPipeline;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cancel::CancellationController;
use crate::gateway::{InteractionGateway, MessageOptions};
use crate::parser::{display_text, AssistantMessageParser, ContentBlock};
use crate::session::TaskState;

/// Command type the core handles itself to finish a task.
pub const COMPLETION_COMMAND: &str = "attempt_completion";

/// Consecutive mistakes of the model, shared by the loop and the processor.
#[derive(Debug, Default)]
pub struct MistakeCounter(AtomicU32);

impl MistakeCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// What one assistant turn produced once presentation finished.
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    /// Content for the next user turn (tool results, feedback)
    pub user_content: Vec<ContentPart>,
    /// A tool result was produced this turn
    pub tool_used: bool,
    /// The operator accepted a completion
    pub completed: bool,
    /// Number of commands sent to the pipeline
    pub dispatched: usize,
}

#[derive(Default)]
struct TurnState {
    raw: String,
    blocks: Vec<ContentBlock>,
    index: usize,
    stream_ended: bool,
    complete: bool,
    pending_update: bool,
    rejected: bool,
    last_rendered: Option<(usize, String, bool)>,
    /// Block index and `ts` of the partial text record still open
    open_text: Option<(usize, i64)>,
    output: TurnOutput,
}

pub struct BlockProcessor {
    task_id: TaskId,
    parser: AssistantMessageParser,
    gateway: Arc<InteractionGateway>,
    pipeline: Arc<CommandPipeline>,
    cancel: Arc<CancellationController>,
    config: TaskConfig,
    events: Arc<EventBus>,
    extensions: Arc<Extensions>,
    mistakes: Arc<MistakeCounter>,
    state: Arc<watch::Sender<TaskState>>,
    turn: Mutex<TurnState>,
    presenting: tokio::sync::Mutex<()>,
}

impl BlockProcessor {
    pub fn new(
        task_id: TaskId,
        gateway: Arc<InteractionGateway>,
        pipeline: Arc<CommandPipeline>,
        cancel: Arc<CancellationController>,
        config: TaskConfig,
    ) -> Self {
        let mut tools: Vec<String> = pipeline.registry().kinds().into_iter().map(String::from).collect();
        tools.push(COMPLETION_COMMAND.to_string());
        Self {
            task_id,
            parser: AssistantMessageParser::new(tools),
            gateway,
            pipeline,
            cancel,
            config,
            events: Arc::new(EventBus::default()),
            extensions: Arc::new(Extensions::new()),
            mistakes: Arc::new(MistakeCounter::default()),
            state: Arc::new(watch::channel(TaskState::Idle).0),
            turn: Mutex::new(TurnState::default()),
            presenting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<Extensions>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_mistakes(mut self, mistakes: Arc<MistakeCounter>) -> Self {
        self.mistakes = mistakes;
        self
    }

    pub fn with_state(mut self, state: Arc<watch::Sender<TaskState>>) -> Self {
        self.state = state;
        self
    }

    fn turn(&self) -> MutexGuard<'_, TurnState> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new assistant turn.
    pub fn reset(&self) {
        *self.turn() = TurnState::default();
    }

    /// Append streamed text and re-derive the block list.
    pub fn push_chunk(&self, delta: &str) {
        let mut turn = self.turn();
        turn.raw.push_str(delta);
        turn.blocks = self.parser.parse(&turn.raw);
    }

    /// No more chunks will arrive; every block is now final.
    pub fn finish_stream(&self) {
        let mut turn = self.turn();
        turn.stream_ended = true;
        turn.blocks.iter_mut().for_each(ContentBlock::finalize);
    }

    pub fn raw_text(&self) -> String {
        self.turn().raw.clone()
    }

    pub fn blocks(&self) -> Vec<ContentBlock> {
        self.turn().blocks.clone()
    }

    /// Every block was presented and the stream has ended.
    pub fn is_complete(&self) -> bool {
        self.turn().complete
    }

    /// Hand over what the turn produced and clear it.
    pub fn take_output(&self) -> TurnOutput {
        std::mem::take(&mut self.turn().output)
    }

    /// Present every block that is ready.
    pub async fn present(&self) -> Result<()> {
        let Ok(_presenting) = self.presenting.try_lock() else {
            self.turn().pending_update = true;
            return Ok(());
        };

        loop {
            self.cancel.check()?;

            let (index, block) = {
                let mut turn = self.turn();
                turn.pending_update = false;
                if turn.index >= turn.blocks.len() {
                    if turn.stream_ended {
                        turn.complete = true;
                    }
                    return Ok(());
                }
                let block = turn.blocks[turn.index].clone();
                if block.is_partial() && matches!(block, ContentBlock::ToolUse { .. }) {
                    // Parameters may still be streaming
                    return Ok(());
                }
                (turn.index, block)
            };

            let partial = block.is_partial();
            match block {
                ContentBlock::Text { content, partial } => self.present_text(index, &content, partial)?,
                ContentBlock::ToolUse { name, params, .. } => {
                    let cacheable = self.pipeline.registry().get(&name).is_some_and(|e| e.cacheable());
                    let command = Command { kind: name, params, cacheable };
                    self.present_tool(command).await?;
                }
            }

            let mut turn = self.turn();
            if !partial {
                turn.index += 1;
            } else if !turn.pending_update {
                return Ok(());
            }
        }
    }

    fn present_text(&self, index: usize, content: &str, partial: bool) -> Result<()> {
        {
            let turn = self.turn();
            if turn.rejected || turn.output.tool_used {
                return Ok(());
            }
        }
        let text = display_text(content, partial);
        if text.is_empty() && partial {
            return Ok(());
        }

        let rendered = (index, text.clone(), partial);
        let open = {
            let mut turn = self.turn();
            if turn.last_rendered.as_ref() == Some(&rendered) {
                return Ok(());
            }
            turn.last_rendered = Some(rendered);
            turn.open_text.filter(|(open, _)| *open == index).map(|(_, ts)| ts)
        };

        // Other records (reasoning, asks) may have been appended since the
        // block opened, so the record is addressed by `ts`.
        let updated = match open {
            Some(ts) => self.gateway.update(ts, text.clone(), partial)?.is_some(),
            None => false,
        };
        if !updated {
            let opts = if partial { MessageOptions::partial(true) } else { MessageOptions::default() };
            let message = self.gateway.say(SayType::Text, text, Vec::new(), opts)?;
            if partial {
                self.turn().open_text = Some((index, message.ts));
            }
        }
        if !partial {
            self.turn().open_text = None;
        }
        Ok(())
    }

    fn push_result(&self, text: String) {
        let mut turn = self.turn();
        turn.output.user_content.push(ContentPart::text(text));
        turn.output.tool_used = true;
    }

    async fn present_tool(&self, command: Command) -> Result<()> {
        {
            let mut turn = self.turn();
            if turn.rejected {
                let text = format!(
                    "Skipping tool [{}] due to user rejecting a previous tool.",
                    command.describe()
                );
                turn.output.user_content.push(ContentPart::text(text));
                return Ok(());
            }
            if turn.output.tool_used {
                let text = format!(
                    "Tool [{}] was not executed because a tool has already been used in this message. \
                     Only one tool may be used per message. Assess the first tool's result before using the next tool.",
                    command.describe()
                );
                turn.output.user_content.push(ContentPart::text(text));
                return Ok(());
            }
        }

        if command.kind == COMPLETION_COMMAND {
            return self.present_completion(&command).await;
        }

        self.state.send_replace(TaskState::Dispatching);
        let header = format!("[{}] Result:", command.describe());
        let mut feedback = None;

        if self.config.is_auto_approved(&command.kind) {
            self.gateway
                .say(SayType::Tool, tool_json(&command, None), Vec::new(), MessageOptions::default())?;
        } else {
            let approval_id = uuid::Uuid::new_v4().to_string();
            let response = self
                .gateway
                .ask(
                    AskType::Tool,
                    tool_json(&command, Some(&approval_id)),
                    MessageOptions::correlated(approval_id.clone()),
                )
                .await?;
            let Some(response) = response else {
                return Ok(());
            };
            if let Some(text) = response.feedback() {
                self.gateway
                    .say(SayType::UserFeedback, text, response.images.clone(), MessageOptions::default())?;
                feedback = Some(text.to_string());
            }
            if response.kind == ResponseKind::No {
                info!(task_id = %self.task_id, command = %command.kind, "Operator denied command");
                let mut text = format!("{header}\nThe user denied this operation.");
                if let Some(feedback) = &feedback {
                    text.push_str(&format!("\nThe user provided the following feedback:\n<feedback>\n{feedback}\n</feedback>"));
                }
                self.push_result(text);
                self.turn().rejected = true;
                self.state.send_replace(TaskState::Streaming);
                return Ok(());
            }
        }

        self.cancel.check()?;
        self.state.send_replace(TaskState::Executing);
        let ctx = ExecutionContext {
            task_id: self.task_id.clone(),
            extensions: self.extensions.clone(),
        };
        let started = Instant::now();
        let result = self.pipeline.run(&command, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.turn().output.dispatched += 1;

        let (output, success) = match result {
            Some(result) => {
                match result.status {
                    CommandStatus::Success => self.mistakes.reset(),
                    CommandStatus::InvalidParams => {
                        self.mistakes.increment();
                    }
                    CommandStatus::Failed => {}
                }
                let success = result.is_success();
                (result.output, success)
            }
            None => {
                self.mistakes.increment();
                (format!("Error: no executor is registered for '{}'.", command.kind), false)
            }
        };
        debug!(task_id = %self.task_id, command = %command.kind, success, duration_ms, "Command presented");

        let mut text = format!("{header}\n{output}");
        if let Some(feedback) = feedback {
            text.push_str(&format!("\n\nThe user provided the following feedback:\n<feedback>\n{feedback}\n</feedback>"));
        }
        self.push_result(text);

        self.events.publish(DomainEvent::ToolExecuted {
            task_id: self.task_id.to_string(),
            command: command.kind.clone(),
            success,
            duration_ms,
            timestamp: chrono::Utc::now(),
        });
        self.state.send_replace(TaskState::Streaming);
        Ok(())
    }

    async fn present_completion(&self, command: &Command) -> Result<()> {
        let result = command.param("result").unwrap_or_default();
        self.gateway
            .say(SayType::CompletionResult, result, Vec::new(), MessageOptions::default())?;
        let response = self
            .gateway
            .ask(AskType::CompletionResult, "", MessageOptions::default())
            .await?;
        self.mistakes.reset();

        let Some(response) = response else {
            return Ok(());
        };
        if response.kind == ResponseKind::Yes {
            let mut turn = self.turn();
            turn.output.tool_used = true;
            turn.output.completed = true;
            return Ok(());
        }

        let feedback = response.feedback().unwrap_or_default().to_string();
        self.gateway
            .say(SayType::UserFeedback, feedback.clone(), response.images.clone(), MessageOptions::default())?;
        self.push_result(format!(
            "[{COMPLETION_COMMAND}] Result:\nThe user has provided feedback on the results. \
             Consider their input to continue the task, and then attempt completion again.\n<feedback>\n{feedback}\n</feedback>"
        ));
        self.turn()
            .output
            .user_content
            .extend(response.images.iter().map(ContentPart::image));
        Ok(())
    }
}

fn tool_json(command: &Command, approval_id: Option<&str>) -> String {
    let mut value = json!({ "tool": command.kind, "params": command.params });
    if let Some(id) = approval_id {
        value["approval_id"] = json!(id);
    }
    value.to_string()
}
