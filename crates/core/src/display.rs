//! Display history types and the display sink seam.
//!
//! Display messages are what the human operator sees. Each one has a stable
//! `ts` id assigned once; while `partial` is true later chunks publish new
//! revisions of the same id, and once finalized the record never changes.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Questions that block the task until the operator responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskType {
    Followup,
    Tool,
    CompletionResult,
    ApiReqFailed,
    MistakeLimitReached,
    ResumeTask,
    ResumeCompletedTask,
}

/// Fire-and-forget notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SayType {
    Task,
    Text,
    Reasoning,
    ApiReqStarted,
    ApiReqRetried,
    Tool,
    CompletionResult,
    UserFeedback,
    Error,
}

/// Whether a record is an ask or a say, and of which subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subtype", rename_all = "snake_case")]
pub enum DisplayKind {
    Ask(AskType),
    Say(SayType),
}

/// A single record in the display history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMessage {
    /// Stable id (milliseconds since epoch, strictly increasing per task)
    pub ts: i64,

    /// Bumped every time a partial record is republished
    #[serde(default)]
    pub revision: u32,

    #[serde(flatten)]
    pub kind: DisplayKind,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    #[serde(default)]
    pub partial: bool,
}

impl DisplayMessage {
    pub fn is_ask(&self) -> bool {
        matches!(self.kind, DisplayKind::Ask(_))
    }
}

/// How the operator answered an ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Primary button ("approve", "retry", "proceed")
    Yes,
    /// Secondary button ("reject")
    No,
    /// Free-form reply
    Message,
}

/// The operator's answer to an ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub kind: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl AskResponse {
    pub fn yes() -> Self {
        Self { kind: ResponseKind::Yes, text: None, images: Vec::new() }
    }

    pub fn no() -> Self {
        Self { kind: ResponseKind::No, text: None, images: Vec::new() }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Message, text: Some(text.into()), images: Vec::new() }
    }

    /// Non-empty feedback text, if any.
    pub fn feedback(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Where display updates are published.
///
/// Fire-and-forget: the core never waits on or inspects the outcome.
/// Sinks reconcile records by `ts`, keeping the highest `revision`.
pub trait DisplaySink: Send + Sync {
    fn notify(&self, message: &DisplayMessage);
}

/// A sink that discards everything.
pub struct NullSink;

impl DisplaySink for NullSink {
    fn notify(&self, _message: &DisplayMessage) {}
}

/// A sink that forwards every revision over an unbounded channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DisplayMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DisplaySink for ChannelSink {
    fn notify(&self, message: &DisplayMessage) {
        // Receiver gone = nobody is watching, that's fine
        let _ = self.sender.send(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_message_serializes_flat() {
        let msg = DisplayMessage {
            ts: 1,
            revision: 0,
            kind: DisplayKind::Ask(AskType::Tool),
            text: "{}".into(),
            images: vec![],
            partial: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""kind":"ask""#));
        assert!(json.contains(r#""subtype":"tool""#));
        let back: DisplayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn blank_feedback_is_ignored() {
        assert_eq!(AskResponse::message("  ").feedback(), None);
        assert_eq!(AskResponse::message("go on").feedback(), Some("go on"));
        assert_eq!(AskResponse::yes().feedback(), None);
    }

    #[tokio::test]
    async fn channel_sink_forwards_revisions() {
        let (sink, mut rx) = ChannelSink::new();
        let msg = DisplayMessage {
            ts: 7,
            revision: 2,
            kind: DisplayKind::Say(SayType::Text),
            text: "hello".into(),
            images: vec![],
            partial: true,
        };
        sink.notify(&msg);
        assert_eq!(rx.recv().await.unwrap(), msg);
    }
}
