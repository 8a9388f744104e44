//! Conversation history store: the API history and the display history.
//!
//! All mutation of display records goes through this store so the stable-id
//! rule holds: `ts` is assigned once on append, a record may change only while
//! it is partial, and every change bumps its `revision`.

use std::sync::{Mutex, MutexGuard};
use taskpilot_core::display::{DisplayKind, DisplayMessage};
use taskpilot_core::error::{Error, Result};
use taskpilot_core::message::{ApiMessage, TaskId};
use tracing::{debug, warn};

use crate::truncation::TruncationStrategy;

/// New content for a partial display record.
#[derive(Debug, Clone, Default)]
pub struct DisplayUpdate {
    pub text: String,
    pub images: Vec<String>,
    /// `false` finalizes the record
    pub partial: bool,
}

#[derive(Default)]
struct Histories {
    api: Vec<ApiMessage>,
    display: Vec<DisplayMessage>,
    frozen: bool,
    last_ts: i64,
}

pub struct HistoryStore {
    task_id: TaskId,
    inner: Mutex<Histories>,
}

impl HistoryStore {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            inner: Mutex::new(Histories::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Histories> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writable(&self) -> Result<MutexGuard<'_, Histories>> {
        let guard = self.lock();
        if guard.frozen {
            return Err(Error::Aborted {
                task_id: self.task_id.to_string(),
            });
        }
        Ok(guard)
    }

    // --- API history ---

    pub fn api_history(&self) -> Vec<ApiMessage> {
        self.lock().api.clone()
    }

    pub fn api_len(&self) -> usize {
        self.lock().api.len()
    }

    pub fn append_api(&self, message: ApiMessage) -> Result<()> {
        self.writable()?.api.push(message);
        Ok(())
    }

    pub fn overwrite_api(&self, history: Vec<ApiMessage>) -> Result<()> {
        self.writable()?.api = history;
        Ok(())
    }

    /// Replace the API history with what `strategy` keeps.
    ///
    /// Returns whether the history got shorter. A strategy that fails to
    /// shrink the history leaves it untouched.
    pub fn truncate(&self, strategy: &dyn TruncationStrategy) -> Result<bool> {
        let mut inner = self.writable()?;
        let before = inner.api.len();
        let kept = strategy.truncate(&inner.api);
        if kept.len() >= before {
            warn!(task_id = %self.task_id, messages = before, "Truncation did not shorten the history");
            return Ok(false);
        }
        debug!(task_id = %self.task_id, before, after = kept.len(), "API history truncated");
        inner.api = kept;
        Ok(true)
    }

    // --- Display history ---

    pub fn display_history(&self) -> Vec<DisplayMessage> {
        self.lock().display.clone()
    }

    pub fn last_display(&self) -> Option<DisplayMessage> {
        self.lock().display.last().cloned()
    }

    /// Append a record with a fresh, strictly increasing `ts`.
    pub fn append_display(
        &self,
        kind: DisplayKind,
        text: String,
        images: Vec<String>,
        partial: bool,
    ) -> Result<DisplayMessage> {
        let mut inner = self.writable()?;
        let ts = chrono::Utc::now().timestamp_millis().max(inner.last_ts + 1);
        inner.last_ts = ts;
        let message = DisplayMessage {
            ts,
            revision: 0,
            kind,
            text,
            images,
            partial,
        };
        inner.display.push(message.clone());
        Ok(message)
    }

    /// Publish a new revision of the last record if it is still partial.
    ///
    /// With `kind` set, the last record must also be of that kind. Returns the
    /// new revision, or `None` when nothing was eligible.
    pub fn mutate_last_if_partial(
        &self,
        kind: Option<DisplayKind>,
        update: DisplayUpdate,
    ) -> Result<Option<DisplayMessage>> {
        let mut inner = self.writable()?;
        let Some(last) = inner.display.last_mut() else {
            return Ok(None);
        };
        if !last.partial || kind.is_some_and(|k| k != last.kind) {
            return Ok(None);
        }
        Ok(Some(apply(last, update)))
    }

    /// Publish a new revision of the partial record with the given `ts`.
    pub fn mutate_partial(&self, ts: i64, update: DisplayUpdate) -> Result<Option<DisplayMessage>> {
        let mut inner = self.writable()?;
        match inner.display.iter_mut().rev().find(|m| m.ts == ts) {
            Some(message) if message.partial => Ok(Some(apply(message, update))),
            _ => Ok(None),
        }
    }

    pub fn overwrite_display(&self, history: Vec<DisplayMessage>) -> Result<()> {
        let mut inner = self.writable()?;
        let max_ts = history.iter().map(|m| m.ts).max().unwrap_or(0);
        inner.last_ts = inner.last_ts.max(max_ts);
        inner.display = history;
        Ok(())
    }

    /// Finalize every record still marked partial; returns the new revisions.
    ///
    /// Allowed on a frozen store so an abort can close what it interrupted.
    pub fn finalize_partials(&self) -> Vec<DisplayMessage> {
        let mut inner = self.lock();
        inner
            .display
            .iter_mut()
            .filter(|m| m.partial)
            .map(|m| {
                m.partial = false;
                m.revision += 1;
                m.clone()
            })
            .collect()
    }

    /// Forbid any further mutation.
    pub fn freeze(&self) {
        self.lock().frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }
}

fn apply(message: &mut DisplayMessage, update: DisplayUpdate) -> DisplayMessage {
    message.text = update.text;
    message.images = update.images;
    message.partial = update.partial;
    message.revision += 1;
    message.clone()
}
