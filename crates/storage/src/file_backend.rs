//! File-based task store: one directory per task, two JSON files each.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<task_id>/api_conversation_history.json
//! <root>/<task_id>/ui_messages.json
//! ```
//!
//! Files are rewritten whole on every checkpoint through a temp file and a
//! rename, so a crash mid-write leaves the previous checkpoint intact.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use taskpilot_core::display::DisplayMessage;
use taskpilot_core::error::StorageError;
use taskpilot_core::message::{ApiMessage, TaskId};
use taskpilot_core::storage::{TaskSnapshot, TaskStore};
use tracing::{debug, warn};

const API_HISTORY_FILE: &str = "api_conversation_history.json";
const DISPLAY_HISTORY_FILE: &str = "ui_messages.json";

pub struct FileTaskStore {
    root: PathBuf,
}

impl FileTaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "File task store opened");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(task_id.as_str())
    }

    async fn write_json<T: serde::Serialize + ?Sized>(
        task_id: &TaskId,
        path: &Path,
        value: &T,
    ) -> Result<(), StorageError> {
        let write_failed = |reason: String| StorageError::WriteFailed {
            task_id: task_id.to_string(),
            reason,
        };
        let content = serde_json::to_vec_pretty(value)
            .map_err(|e| write_failed(format!("Failed to serialize {}: {e}", path.display())))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| write_failed(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| write_failed(format!("Failed to replace {}: {e}", path.display())))?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        task_id: &TaskId,
        path: &Path,
    ) -> Result<Option<T>, StorageError> {
        let content = match tokio::fs::read(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    task_id: task_id.to_string(),
                    reason: format!("Failed to read {}: {e}", path.display()),
                });
            }
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| StorageError::Corrupted {
                task_id: task_id.to_string(),
                reason: format!("{}: {e}", path.display()),
            })
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(
        &self,
        task_id: &TaskId,
        api_history: &[ApiMessage],
        display_history: &[DisplayMessage],
    ) -> Result<(), StorageError> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::WriteFailed {
                task_id: task_id.to_string(),
                reason: format!("Failed to create task directory: {e}"),
            })?;

        Self::write_json(task_id, &dir.join(API_HISTORY_FILE), api_history).await?;
        Self::write_json(task_id, &dir.join(DISPLAY_HISTORY_FILE), display_history).await?;

        debug!(
            task_id = %task_id,
            api_messages = api_history.len(),
            display_messages = display_history.len(),
            "Task checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<TaskSnapshot>, StorageError> {
        let dir = self.task_dir(task_id);
        let api: Option<Vec<ApiMessage>> = Self::read_json(task_id, &dir.join(API_HISTORY_FILE)).await?;
        let Some(api_history) = api else {
            return Ok(None);
        };

        // Skip individual unreadable display records rather than failing the resume
        let raw: Vec<Value> = Self::read_json(task_id, &dir.join(DISPLAY_HISTORY_FILE))
            .await?
            .unwrap_or_default();
        let display_history = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<DisplayMessage>(value) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Skipping corrupted display record");
                    None
                }
            })
            .collect();

        Ok(Some(TaskSnapshot {
            api_history,
            display_history,
        }))
    }

    async fn list(&self) -> Result<Vec<TaskId>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    task_id: String::new(),
                    reason: format!("Failed to list {}: {e}", self.root.display()),
                });
            }
        };

        let mut ids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().join(API_HISTORY_FILE).exists() {
                ids.push(TaskId(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
