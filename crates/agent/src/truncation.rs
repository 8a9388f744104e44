//! Context-window truncation policy.

use taskpilot_core::message::ApiMessage;

/// Selects which part of the API history to keep when it no longer fits.
///
/// Implementations return a strictly shorter history that preserves the most
/// recent turns, or the input unchanged when nothing can be dropped.
pub trait TruncationStrategy: Send + Sync {
    fn truncate(&self, history: &[ApiMessage]) -> Vec<ApiMessage>;
}

/// Keeps the first message (the task) and drops the oldest half of the rest.
///
/// An even number of messages is removed so user/assistant alternation holds.
/// The most recent message is always kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindow;

impl TruncationStrategy for SlidingWindow {
    fn truncate(&self, history: &[ApiMessage]) -> Vec<ApiMessage> {
        let Some((first, rest)) = history.split_first() else {
            return Vec::new();
        };

        let mut remove = rest.len() / 2;
        remove -= remove % 2;
        if remove == 0 && rest.len() >= 3 {
            remove = 2;
        }

        let mut kept = Vec::with_capacity(history.len() - remove);
        kept.push(first.clone());
        kept.extend_from_slice(&rest[remove..]);
        kept
    }
}
