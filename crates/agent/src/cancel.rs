//! Cancellation controller: the task-wide abort flag and owned sessions.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use taskpilot_core::error::{Error, Result};
use taskpilot_core::message::TaskId;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

/// Why a stream was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    UserCancelled,
    StreamingFailed,
}

impl InterruptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptReason::UserCancelled => "user_cancelled",
            InterruptReason::StreamingFailed => "streaming_failed",
        }
    }

    /// Annotation appended to the interrupted assistant turn.
    pub fn annotation(&self) -> &'static str {
        match self {
            InterruptReason::UserCancelled => "[Response interrupted by user]",
            InterruptReason::StreamingFailed => "[Response interrupted by API Error]",
        }
    }
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external resource a task holds open (browser, terminal, MCP client).
#[async_trait]
pub trait ExternalSession: Send + Sync {
    fn name(&self) -> &str;

    async fn release(&self);
}

/// Owns the abort state of one task.
pub struct CancellationController {
    task_id: TaskId,
    token: CancellationToken,
    aborted: AtomicBool,
    abandoned: AtomicBool,
    sessions: Mutex<Vec<Arc<dyn ExternalSession>>>,
}

impl CancellationController {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            token: CancellationToken::new(),
            aborted: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Set once the host has dropped the task and nobody will resume it here.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Fails with [`Error::Aborted`] once the task has been aborted.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(self.error());
        }
        Ok(())
    }

    pub fn error(&self) -> Error {
        Error::Aborted {
            task_id: self.task_id.to_string(),
        }
    }

    /// Resolves when the task is aborted.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Hand an external session to the task; it is released on abort.
    pub fn register_session(&self, session: Arc<dyn ExternalSession>) {
        debug!(task_id = %self.task_id, session = session.name(), "External session registered");
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session);
    }

    /// Abort the task. Idempotent.
    ///
    /// Wakes every waiter, then releases owned sessions in registration order.
    pub async fn abort_task(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(task_id = %self.task_id, "Aborting task");
        self.token.cancel();

        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for session in sessions {
            debug!(task_id = %self.task_id, session = session.name(), "Releasing external session");
            session.release().await;
        }
    }

    /// Abort and mark the task as dropped by its host.
    pub async fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.abort_task().await;
    }
}
