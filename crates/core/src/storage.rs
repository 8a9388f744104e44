//! Task store trait: durable, task-scoped persistence of both histories.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::display::DisplayMessage;
use crate::error::StorageError;
use crate::message::{ApiMessage, TaskId};

/// Everything needed to resume a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub api_history: Vec<ApiMessage>,
    pub display_history: Vec<DisplayMessage>,
}

/// Where task histories are saved between checkpoints.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the stored histories for a task.
    async fn save(
        &self,
        task_id: &TaskId,
        api_history: &[ApiMessage],
        display_history: &[DisplayMessage],
    ) -> Result<(), StorageError>;

    /// Load a task's histories, `None` if the task was never saved.
    async fn load(&self, task_id: &TaskId) -> Result<Option<TaskSnapshot>, StorageError>;

    /// Ids of all stored tasks.
    async fn list(&self) -> Result<Vec<TaskId>, StorageError>;
}
