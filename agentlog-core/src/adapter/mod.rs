//! Adapter trait abstraction
//!
//! Every supported assistant implements [`Adapter`] to expose its on-disk
//! archive through the canonical model in [`crate::types`].
//!
//! ## Design Principles
//!
//! 1. **Resilience**: A malformed record is skipped, never fatal to the session
//! 2. **Incremental**: Parsed state is cached per session and resumed by byte offset
//! 3. **Isolation**: One session's I/O failure never aborts a listing
//! 4. **Extensible**: A new assistant only requires implementing this trait
//!
//! Adapters are synchronous. Callers on an async runtime run them inside
//! `spawn_blocking`; see [`crate::loader`] and [`crate::search`].

pub mod archive;
pub mod claude;
pub mod codex;
pub mod scan;

pub use claude::ClaudeCodeAdapter;
pub use codex::CodexAdapter;

use crate::config::{Config, WatchConfig};
use crate::error::Result;
use crate::search::Matcher;
use crate::types::{Capabilities, Message, MessageMatch, Session, UsageStats};
use crate::watch::WatchHandle;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handle to an adapter.
pub type AdapterRef = Arc<dyn Adapter>;

/// One window of a session's messages.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages in chronological order
    pub messages: Vec<Message>,
    /// Total messages in the session
    pub total: usize,
    /// How many of the newest messages were skipped
    pub offset: usize,
}

impl MessagePage {
    /// Slice a window out of the full chronological list.
    ///
    /// `offset` counts back from the newest message, so `offset = 0` returns
    /// the tail of the session.
    pub fn window(all: &[Message], offset: usize, limit: usize) -> Self {
        let total = all.len();
        let end = total.saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Self {
            messages: all[start..end].to_vec(),
            total,
            offset,
        }
    }

    /// Whether messages older than this page exist.
    pub fn has_older(&self) -> bool {
        self.offset + self.messages.len() < self.total
    }
}

/// Trait implemented by every assistant adapter.
///
/// ## Example
///
/// ```rust,ignore
/// use agentlog_core::adapter::Adapter;
///
/// struct MyAdapter;
///
/// impl Adapter for MyAdapter {
///     fn id(&self) -> &'static str { "my-tool" }
///     // ... implement other methods
/// }
/// ```
pub trait Adapter: Send + Sync {
    /// Stable identifier (e.g. `"claude-code"`)
    fn id(&self) -> &'static str;

    /// Display name
    fn name(&self) -> &'static str;

    /// Single-glyph icon shown next to sessions
    fn icon(&self) -> &'static str;

    /// Whether this adapter has any sessions for `project_root`.
    fn detect(&self, project_root: &Path) -> Result<bool>;

    fn capabilities(&self) -> Capabilities;

    /// All sessions for `project_root`, in no particular order.
    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>>;

    /// A window of messages; see [`MessagePage::window`] for offset semantics.
    fn messages(&self, session_id: &str, offset: usize, limit: usize) -> Result<MessagePage>;

    /// Aggregate token usage for a session.
    fn usage(&self, session_id: &str) -> Result<UsageStats>;

    /// Start watching `project_root`. `None` when there is nothing to watch yet.
    fn watch(&self, project_root: &Path, config: &WatchConfig) -> Result<Option<WatchHandle>>;

    /// Content search support, when the adapter provides it.
    fn searcher(&self) -> Option<&dyn MessageSearcher> {
        None
    }
}

/// Optional per-session content search.
pub trait MessageSearcher: Send + Sync {
    /// Search every message of one session.
    ///
    /// Implementations poll `cancel` between records and return
    /// [`crate::Error::Cancelled`] once it fires.
    fn search_messages(
        &self,
        session_id: &str,
        matcher: &Matcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageMatch>>;
}

/// Create all bundled adapters, honoring configured root overrides.
pub fn create_all_adapters(config: &Config) -> Vec<AdapterRef> {
    let fallback = &config.timestamps.fallback;
    vec![
        Arc::new(
            ClaudeCodeAdapter::with_root(config.adapters.claude_code_root())
                .with_timestamp_fallback(fallback.clone()),
        ),
        Arc::new(
            CodexAdapter::with_root(config.adapters.codex_root())
                .with_timestamp_fallback(fallback.clone()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new(format!("m{}", i), Role::User, Utc::now()))
            .collect()
    }

    #[test]
    fn test_window_from_newest() {
        let all = messages(10);
        let page = MessagePage::window(&all, 0, 4);
        let ids: Vec<_> = page.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m6", "m7", "m8", "m9"]);
        assert_eq!(page.total, 10);
        assert!(page.has_older());
    }

    #[test]
    fn test_window_with_offset_reaches_start() {
        let all = messages(10);
        let page = MessagePage::window(&all, 8, 4);
        let ids: Vec<_> = page.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1"]);
        assert!(!page.has_older());
    }

    #[test]
    fn test_window_past_end_is_empty() {
        let all = messages(3);
        let page = MessagePage::window(&all, 5, 4);
        assert!(page.messages.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_create_all_adapters() {
        let adapters = create_all_adapters(&Config::default());
        let ids: Vec<_> = adapters.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["claude-code", "codex"]);
    }
}
