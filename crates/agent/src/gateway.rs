//! Interaction gateway: the ask/say protocol with the human operator.
//!
//! `say` publishes a record and returns. `ask` publishes a record and waits
//! on a single-slot channel until the operator answers, a newer ask
//! supersedes it, or the task is aborted. At most one ask is live per task.

use std::sync::{Arc, Mutex, MutexGuard};
use taskpilot_core::display::{AskResponse, AskType, DisplayKind, DisplayMessage, DisplaySink, SayType};
use taskpilot_core::error::{Error, Result};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cancel::CancellationController;
use crate::history::{DisplayUpdate, HistoryStore};

/// How a say or ask is recorded.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// `Some(true)` opens or updates a partial record, `Some(false)`
    /// finalizes it, `None` always appends a complete record.
    pub partial: Option<bool>,
    /// Update the last partial record even if its kind differs
    pub replacing: bool,
    /// Record an ask without waiting for the answer
    pub no_return: bool,
    /// Explicit key for out-of-band answers
    pub correlation_id: Option<String>,
}

impl MessageOptions {
    pub fn partial(partial: bool) -> Self {
        Self {
            partial: Some(partial),
            ..Default::default()
        }
    }

    pub fn no_return() -> Self {
        Self {
            no_return: true,
            ..Default::default()
        }
    }

    pub fn correlated(id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// Sent to a waiting ask when a newer one replaces it.
struct Superseded;

struct PendingAsk {
    ts: i64,
    ask_type: AskType,
    correlation_id: Option<String>,
    sender: oneshot::Sender<std::result::Result<AskResponse, Superseded>>,
}

pub struct InteractionGateway {
    history: Arc<HistoryStore>,
    sink: Arc<dyn DisplaySink>,
    cancel: Arc<CancellationController>,
    pending: Mutex<Option<PendingAsk>>,
}

impl InteractionGateway {
    pub fn new(
        history: Arc<HistoryStore>,
        sink: Arc<dyn DisplaySink>,
        cancel: Arc<CancellationController>,
    ) -> Self {
        Self {
            history,
            sink,
            cancel,
            pending: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingAsk>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(
        &self,
        kind: DisplayKind,
        text: String,
        images: Vec<String>,
        opts: &MessageOptions,
    ) -> Result<DisplayMessage> {
        self.cancel.check()?;
        let message = match opts.partial {
            Some(partial) => {
                let matching = (!opts.replacing).then_some(kind);
                let update = DisplayUpdate {
                    text: text.clone(),
                    images: images.clone(),
                    partial,
                };
                match self.history.mutate_last_if_partial(matching, update)? {
                    Some(updated) => updated,
                    None => self.history.append_display(kind, text, images, partial)?,
                }
            }
            None => self.history.append_display(kind, text, images, false)?,
        };
        self.sink.notify(&message);
        Ok(message)
    }

    /// Publish a notification.
    pub fn say(
        &self,
        kind: SayType,
        text: impl Into<String>,
        images: Vec<String>,
        opts: MessageOptions,
    ) -> Result<DisplayMessage> {
        self.record(DisplayKind::Say(kind), text.into(), images, &opts)
    }

    /// Publish a question and wait for the answer.
    ///
    /// Returns `None` for partial or `no_return` asks. Fails with
    /// [`Error::AskSuperseded`] if a newer ask replaces this one, and with
    /// [`Error::Aborted`] if the task is aborted while waiting.
    pub async fn ask(
        &self,
        kind: AskType,
        text: impl Into<String>,
        opts: MessageOptions,
    ) -> Result<Option<AskResponse>> {
        let message = self.record(DisplayKind::Ask(kind), text.into(), Vec::new(), &opts)?;
        if opts.partial == Some(true) || opts.no_return {
            return Ok(None);
        }

        let (sender, receiver) = oneshot::channel();
        let previous = self.slot().replace(PendingAsk {
            ts: message.ts,
            ask_type: kind,
            correlation_id: opts.correlation_id.clone(),
            sender,
        });
        if let Some(previous) = previous {
            warn!(superseded = previous.ts, by = message.ts, "Pending ask superseded");
            let _ = previous.sender.send(Err(Superseded));
        }
        debug!(ts = message.ts, ask = ?kind, "Waiting for operator response");

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.clear_pending(message.ts);
                Err(self.cancel.error())
            }
            outcome = receiver => match outcome {
                Ok(Ok(response)) => Ok(Some(response)),
                _ => Err(Error::AskSuperseded { message_ts: message.ts }),
            }
        }
    }

    fn clear_pending(&self, ts: i64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|p| p.ts == ts) {
            slot.take();
        }
    }

    fn resolve(&self, matches: impl FnOnce(&PendingAsk) -> bool, response: AskResponse) -> bool {
        let pending = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(p) if matches(p) => slot.take(),
                _ => None,
            }
        };
        match pending {
            Some(pending) => pending.sender.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Answer the live ask. Returns `false` if nothing was waiting.
    pub fn respond(&self, response: AskResponse) -> bool {
        let resolved = self.resolve(|_| true, response);
        if !resolved {
            warn!("Response received with no pending ask");
        }
        resolved
    }

    /// Answer the live ask only if it carries this correlation id.
    pub fn receive_answer(&self, correlation_id: &str, response: AskResponse) -> bool {
        let resolved = self.resolve(|p| p.correlation_id.as_deref() == Some(correlation_id), response);
        if !resolved {
            warn!(correlation_id, "Stale or unknown correlation id");
        }
        resolved
    }

    /// Answer the live ask only if it is of the given type.
    pub fn respond_to(&self, kind: AskType, response: AskResponse) -> bool {
        self.resolve(|p| p.ask_type == kind, response)
    }

    pub fn has_pending_ask(&self) -> bool {
        self.slot().is_some()
    }

    /// Type and correlation id of the live ask, if any.
    pub fn pending_ask(&self) -> Option<(AskType, Option<String>)> {
        self.slot()
            .as_ref()
            .map(|p| (p.ask_type, p.correlation_id.clone()))
    }

    /// Finalize the partial record with this `ts`.
    pub fn finish(&self, ts: i64, text: impl Into<String>) -> Result<Option<DisplayMessage>> {
        self.update(ts, text, false)
    }

    /// Publish a new revision of the partial record with this `ts`, wherever
    /// it sits in the display history.
    pub fn update(&self, ts: i64, text: impl Into<String>, partial: bool) -> Result<Option<DisplayMessage>> {
        let update = DisplayUpdate {
            text: text.into(),
            images: Vec::new(),
            partial,
        };
        let updated = self.history.mutate_partial(ts, update)?;
        if let Some(message) = &updated {
            self.sink.notify(message);
        }
        Ok(updated)
    }

    /// Forward a record changed outside the gateway to the sink.
    pub fn publish(&self, message: &DisplayMessage) {
        self.sink.notify(message);
    }
}
