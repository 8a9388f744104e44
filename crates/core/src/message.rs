//! LLM-facing conversation types.
//!
//! These are the role-tagged turns that make up the API history of a task:
//! user content goes in → the assistant streams a reply → tool results become
//! the next user turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task (one agent conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in the API history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human operator, or tool results fed back on their behalf
    User,
    /// The model
    Assistant,
}

/// One piece of turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Base64 data URL or provider-specific image reference
    Image { source: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(source: impl Into<String>) -> Self {
        ContentPart::Image { source: source.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            ContentPart::Image { .. } => None,
        }
    }
}

/// Build user content from free text plus attached images.
pub fn user_content(text: impl Into<String>, images: &[String]) -> Vec<ContentPart> {
    let mut parts = vec![ContentPart::text(text)];
    parts.extend(images.iter().map(ContentPart::image));
    parts
}

/// A single turn in the API history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Unique message ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl ApiMessage {
    /// Create a new user turn.
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new assistant turn from streamed text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
