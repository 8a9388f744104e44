//! Caching middleware: serves repeated cacheable commands from memory.
//!
//! Only commands explicitly marked `cacheable` participate. Entries are keyed
//! by type plus the serialized command and expire after a TTL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use taskpilot_core::command::{Command, CommandResult, ExecutionContext};
use taskpilot_core::error::ToolError;
use tokio::time::Instant;
use tracing::debug;

use super::{Middleware, Next};

struct CacheEntry {
    stored_at: Instant,
    result: CommandResult,
}

pub struct CachingMiddleware {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CachingMiddleware {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(command: &Command) -> Option<String> {
        let serialized = serde_json::to_string(command).ok()?;
        Some(format!("{}:{}", command.kind, serialized))
    }

    fn lookup(&self, key: &str) -> Option<CommandResult> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, result: CommandResult) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                result,
            },
        );
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for CachingMiddleware {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl Middleware for CachingMiddleware {
    fn name(&self) -> &str {
        "caching"
    }

    async fn handle(
        &self,
        command: &Command,
        ctx: &ExecutionContext,
        next: Next<'_>,
    ) -> Result<CommandResult, ToolError> {
        let key = match (command.cacheable, Self::key(command)) {
            (true, Some(key)) => key,
            _ => return next.run(command, ctx).await,
        };

        if let Some(hit) = self.lookup(&key) {
            debug!(command = %command.kind, "Serving command from cache");
            return Ok(hit.with_metadata("cache_hit", true));
        }

        let result = next.run(command, ctx).await?;
        if result.is_success() {
            self.store(key, result.clone());
        }
        Ok(result)
    }
}
