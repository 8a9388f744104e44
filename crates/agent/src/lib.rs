//! The task session loop: the heart of taskpilot.
//!
//! A task alternates between the model and the host:
//!
//! 1. **Request**: the user content is appended to the API history and sent
//! 2. **Stream**: chunks are parsed into text and tool blocks as they arrive
//! 3. **Present**: text is shown to the operator, the first tool of the turn
//!    is approved and run through the command pipeline
//! 4. **Observe**: tool results become the next user content
//!
//! The loop ends when the operator accepts a completion, the task is aborted,
//! the stream fails, or the model returns nothing. Every step is checkpointed
//! to the task store so an interrupted task can be resumed.

pub mod blocks;
pub mod cancel;
pub mod gateway;
pub mod history;
pub mod parser;
pub mod session;
pub mod truncation;

pub use blocks::{BlockProcessor, MistakeCounter, TurnOutput, COMPLETION_COMMAND};
pub use cancel::{CancellationController, ExternalSession, InterruptReason};
pub use gateway::{InteractionGateway, MessageOptions};
pub use history::{DisplayUpdate, HistoryStore};
pub use parser::{AssistantMessageParser, ContentBlock};
pub use session::{ApprovalDecision, Task, TaskBuilder, TaskHandle, TaskOutcome, TaskState, NO_TOOLS_USED};
pub use truncation::{SlidingWindow, TruncationStrategy};
