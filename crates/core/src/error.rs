//! Error types for the taskpilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all taskpilot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Task lifecycle ---
    #[error("Task {task_id} has been aborted")]
    Aborted { task_id: String },

    #[error("Ask {message_ts} was superseded by a newer message")]
    AskSuperseded { message_ts: i64 },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is the abort signal rather than a real failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ApiError { status_code, .. } => *status_code >= 500,
            ProviderError::RateLimited { .. }
            | ProviderError::StreamInterrupted(_)
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => true,
            ProviderError::AuthenticationFailed(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read task {task_id}: {reason}")]
    ReadFailed { task_id: String, reason: String },

    #[error("Failed to write task {task_id}: {reason}")]
    WriteFailed { task_id: String, reason: String },

    #[error("Corrupted task data for {task_id}: {reason}")]
    Corrupted { task_id: String, reason: String },
}
