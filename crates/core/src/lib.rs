//! # taskpilot core
//!
//! Domain types, traits, and error definitions for the taskpilot agent
//! orchestration core. This crate has **no runtime logic**; it defines the
//! domain model and the seams every other crate implements against.
//!
//! ## Seams
//!
//! - [`Provider`]: the LLM boundary, an opaque async chunk producer
//! - [`CommandExecutor`]: concrete tools supplied by the host
//! - [`DisplaySink`]: where display records are published
//! - [`TaskStore`]: durable, task-scoped persistence

pub mod command;
pub mod display;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod storage;

// Re-export key types at crate root for ergonomics
pub use command::{Command, CommandExecutor, CommandResult, CommandStatus, ExecutionContext, Extensions};
pub use display::{AskResponse, AskType, DisplayKind, DisplayMessage, DisplaySink, ResponseKind, SayType};
pub use error::{Error, ProviderError, Result, StorageError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ApiMessage, ContentPart, Role, TaskId};
pub use provider::{ApiChunk, ApiStream, ModelInfo, Provider, UsageTotals};
pub use storage::{TaskSnapshot, TaskStore};
