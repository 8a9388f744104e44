//! Domain event system: decoupled observation of task progress.
//!
//! Events are published when something interesting happens in a task.
//! Hosts can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A task started or resumed
    TaskStarted {
        task_id: String,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A request was sent to the provider
    ApiRequestStarted {
        task_id: String,
        turn: u32,
        history_len: usize,
        timestamp: DateTime<Utc>,
    },

    /// A command was executed
    ToolExecuted {
        task_id: String,
        command: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The API history was truncated to fit the context window
    HistoryTruncated {
        task_id: String,
        before: usize,
        after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A stream was cut short
    StreamInterrupted {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The operator accepted a completion
    TaskCompleted {
        task_id: String,
        turns: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
