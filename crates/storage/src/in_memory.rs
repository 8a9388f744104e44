//! In-memory task store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use taskpilot_core::display::DisplayMessage;
use taskpilot_core::error::StorageError;
use taskpilot_core::message::{ApiMessage, TaskId};
use taskpilot_core::storage::{TaskSnapshot, TaskStore};
use tokio::sync::RwLock;

/// Keeps snapshots in a map keyed by task id.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, TaskSnapshot>>>,
    saves: AtomicUsize,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Seed a snapshot directly, e.g. to set up a resume.
    pub async fn insert(&self, task_id: TaskId, snapshot: TaskSnapshot) {
        self.tasks.write().await.insert(task_id, snapshot);
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(
        &self,
        task_id: &TaskId,
        api_history: &[ApiMessage],
        display_history: &[DisplayMessage],
    ) -> Result<(), StorageError> {
        self.tasks.write().await.insert(
            task_id.clone(),
            TaskSnapshot {
                api_history: api_history.to_vec(),
                display_history: display_history.to_vec(),
            },
        );
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<TaskSnapshot>, StorageError> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskId>, StorageError> {
        let mut ids: Vec<TaskId> = self.tasks.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
