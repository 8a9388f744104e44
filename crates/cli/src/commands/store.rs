//! Task store selection from configuration.

use std::sync::Arc;
use taskpilot_config::StorageConfig;
use taskpilot_core::storage::TaskStore;
use taskpilot_storage::{FileTaskStore, InMemoryTaskStore};

pub fn open(config: &StorageConfig) -> Arc<dyn TaskStore> {
    match config.backend.as_str() {
        "memory" => Arc::new(InMemoryTaskStore::new()),
        _ => Arc::new(FileTaskStore::new(config.resolved_dir())),
    }
}
