//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider takes a system prompt and the API history and returns a stream
//! of chunks. The core never sees the transport.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::ApiMessage;

/// A single chunk in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiChunk {
    /// Partial assistant text
    Text { delta: String },

    /// Partial reasoning text (not part of the assistant turn)
    Reasoning { delta: String },

    /// Token accounting, usually once near the end of the stream
    Usage(UsageTotals),
}

impl ApiChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        ApiChunk::Text { delta: delta.into() }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        ApiChunk::Reasoning { delta: delta.into() }
    }
}

/// Token usage information for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cache_writes: u64,
    #[serde(default)]
    pub cache_reads: u64,
    #[serde(default)]
    pub total_cost: f64,
}

impl UsageTotals {
    /// Tokens that count against the context window.
    pub fn context_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out + self.cache_writes + self.cache_reads
    }

    /// Accumulate another usage chunk into this one.
    pub fn add(&mut self, other: &UsageTotals) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.cache_writes += other.cache_writes;
        self.cache_reads += other.cache_reads;
        self.total_cost += other.total_cost;
    }
}

/// Static facts about the model behind a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub context_window: u64,
}

/// The chunk stream returned by [`Provider::send`].
pub type ApiStream = BoxStream<'static, std::result::Result<ApiChunk, ProviderError>>;

/// The core Provider trait.
///
/// An error returned from `send`, or as the very first stream item, is a
/// first-chunk failure and may be resubmitted. Errors after that are
/// mid-stream failures.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// The model this provider talks to.
    fn model(&self) -> ModelInfo;

    /// Open a streamed completion.
    async fn send(
        &self,
        system_prompt: &str,
        history: &[ApiMessage],
    ) -> std::result::Result<ApiStream, ProviderError>;
}
