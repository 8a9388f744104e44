//! Command executor trait: the abstraction over agent capabilities.
//!
//! A finalized tool-use block from the model is normalized into a
//! [`Command`] and handed to an executor registered for its type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use crate::error::ToolError;
use crate::message::TaskId;

/// A request to execute a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command type (the tool name the model used)
    #[serde(rename = "type")]
    pub kind: String,

    /// Parameters, in stable key order
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Whether results may be served from the caching middleware
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cacheable: bool,
}

impl Command {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
            cacheable: false,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Short label used in tool-result headers, e.g. `read_file for 'src/main.rs'`.
    pub fn describe(&self) -> String {
        match self.params.values().next() {
            Some(first) if first.len() <= 80 && !first.contains('\n') => {
                format!("{} for '{}'", self.kind, first)
            }
            _ => self.kind.clone(),
        }
    }
}

/// How a command execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    /// The executor failed; the error text is the output
    Failed,
    /// Required parameters were missing or malformed
    InvalidParams,
}

/// The result of a command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// The output content fed back to the model
    pub output: String,

    pub status: CommandStatus,

    /// Annotations added by middleware (attempts, timings, cache hits)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CommandResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: CommandStatus::Success,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: CommandStatus::Failed,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn invalid(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: CommandStatus::InvalidParams,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Host-supplied services keyed by type (capability registries, clients, ...).
#[derive(Default)]
pub struct Extensions {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.entries.len()).finish()
    }
}

/// What an executor can see besides the command itself.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: TaskId,
    pub extensions: Arc<Extensions>,
}

impl ExecutionContext {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            extensions: Arc::new(Extensions::new()),
        }
    }

    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = Arc::new(extensions);
        self
    }
}

/// The core executor trait.
///
/// Concrete tools (file access, shell, browser) implement this trait in the
/// host and are registered per task with the executor registry.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Parameters that must be present before dispatch.
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Results for identical parameters may be reused while fresh.
    fn cacheable(&self) -> bool {
        false
    }

    /// Execute the command.
    async fn execute(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
    ) -> std::result::Result<CommandResult, ToolError>;
}
