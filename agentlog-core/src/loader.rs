//! Session list loading and message paging.
//!
//! [`SessionLoader`] fans `Adapter::sessions` out across adapters on the
//! blocking pool and serializes whole passes, so a storm of refresh requests
//! collapses into at most one extra pass. [`MessagePager`] holds one session's
//! visible window and folds appended messages in without rebuilding.

use crate::adapter::{AdapterRef, MessagePage};
use crate::error::{Error, ErrorKind, Result};
use crate::summary::{extend_turns, group_turns, SessionSummary, Turn};
use crate::types::{sort_sessions, Capability, Message, Session};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

fn join_error(e: tokio::task::JoinError) -> Error {
    if e.is_cancelled() {
        Error::Cancelled
    } else {
        Error::Io(std::io::Error::other(e.to_string()))
    }
}

// ============================================
// Session loader
// ============================================

/// Loads and merges the session lists of every adapter.
pub struct SessionLoader {
    adapters: Vec<AdapterRef>,
    project_root: PathBuf,
    running: Mutex<()>,
    pending: AtomicBool,
}

impl SessionLoader {
    pub fn new(adapters: Vec<AdapterRef>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            adapters,
            project_root: project_root.into(),
            running: Mutex::new(()),
            pending: AtomicBool::new(false),
        }
    }

    pub fn adapters(&self) -> &[AdapterRef] {
        &self.adapters
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn adapter(&self, id: &str) -> Option<&AdapterRef> {
        self.adapters.iter().find(|a| a.id() == id)
    }

    /// Adapters keyed by ID, as the search engine expects them.
    pub fn adapter_map(&self) -> HashMap<String, AdapterRef> {
        self.adapters
            .iter()
            .map(|a| (a.id().to_string(), Arc::clone(a)))
            .collect()
    }

    /// Load the merged session list.
    ///
    /// Returns `None` when a pass is already running; that pass picks up this
    /// request before it finishes.
    pub async fn load(&self) -> Option<Vec<Session>> {
        self.pending.store(true, Ordering::SeqCst);
        let mut latest = None;

        loop {
            let Ok(guard) = self.running.try_lock() else {
                return latest;
            };
            let mut passes = 0;
            while self.pending.swap(false, Ordering::SeqCst) {
                passes += 1;
                latest = Some(self.load_once().await);
            }
            drop(guard);

            if passes > 1 {
                tracing::debug!(passes, "Folded overlapping session loads");
            }
            // A request may have arrived between the last swap and the unlock.
            if !self.pending.load(Ordering::SeqCst) {
                return latest;
            }
        }
    }

    async fn load_once(&self) -> Vec<Session> {
        let mut tasks = JoinSet::new();
        for adapter in &self.adapters {
            if !adapter.capabilities().contains(Capability::Sessions) {
                continue;
            }
            let adapter = Arc::clone(adapter);
            let root = self.project_root.clone();
            tasks.spawn_blocking(move || {
                let result = match adapter.detect(&root) {
                    Ok(true) => adapter.sessions(&root),
                    Ok(false) => Ok(Vec::new()),
                    Err(e) => Err(e),
                };
                (adapter.id(), result)
            });
        }

        let mut sessions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(found))) => sessions.extend(found),
                Ok((_, Err(e))) if e.kind() == ErrorKind::NotFound => {}
                Ok((adapter, Err(e))) => {
                    tracing::warn!(adapter, error = %e, "Failed to list sessions");
                }
                Err(e) => tracing::warn!(error = %e, "Session listing task failed"),
            }
        }

        sort_sessions(&mut sessions);
        tracing::debug!(count = sessions.len(), "Sessions loaded");
        sessions
    }
}

// ============================================
// Message pager
// ============================================

/// What a page load did to the pager's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerUpdate {
    /// Everything was replaced
    Replaced,
    /// New messages were appended to the held ones
    Appended {
        added: usize,
        /// Held messages whose content changed (e.g. a tool result arrived)
        changed: Vec<String>,
    },
    Unchanged,
}

/// A window of one session's messages plus derived turns and summary.
pub struct MessagePager {
    adapter: AdapterRef,
    session_id: String,
    page_size: usize,
    offset: usize,
    total: usize,
    messages: Vec<Arc<Message>>,
    turns: Vec<Turn>,
    summary: SessionSummary,
    cursor: usize,
}

impl MessagePager {
    pub fn new(adapter: AdapterRef, session_id: impl Into<String>, page_size: usize) -> Self {
        Self {
            adapter,
            session_id: session_id.into(),
            page_size: page_size.max(1),
            offset: 0,
            total: 0,
            messages: Vec::new(),
            turns: Vec::new(),
            summary: SessionSummary::default(),
            cursor: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn adapter_id(&self) -> &'static str {
        self.adapter.id()
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn has_older(&self) -> bool {
        self.offset + self.messages.len() < self.total
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.messages.len().saturating_sub(1));
    }

    /// Fetch the current window from the adapter and fold it in.
    pub async fn load(&mut self) -> Result<PagerUpdate> {
        let page = self.fetch(self.offset).await?;
        Ok(self.apply(page))
    }

    /// Move half a page towards older messages (`n`).
    pub async fn older(&mut self) -> Result<PagerUpdate> {
        if !self.has_older() {
            return Ok(PagerUpdate::Unchanged);
        }
        let offset = self.offset + (self.page_size / 2).max(1);
        let page = self.fetch(offset).await?;
        Ok(self.apply(page))
    }

    /// Move half a page towards newer messages (`p`).
    pub async fn newer(&mut self) -> Result<PagerUpdate> {
        if self.offset == 0 {
            return Ok(PagerUpdate::Unchanged);
        }
        let offset = self.offset.saturating_sub((self.page_size / 2).max(1));
        let page = self.fetch(offset).await?;
        Ok(self.apply(page))
    }

    async fn fetch(&self, offset: usize) -> Result<MessagePage> {
        if !self.adapter.capabilities().contains(Capability::Messages) {
            return Err(Error::CapabilityMissing {
                adapter: self.adapter.id().to_string(),
                capability: Capability::Messages.as_str(),
            });
        }
        let adapter = Arc::clone(&self.adapter);
        let session_id = self.session_id.clone();
        let limit = self.page_size;
        tokio::task::spawn_blocking(move || adapter.messages(&session_id, offset, limit))
            .await
            .map_err(join_error)?
    }

    /// Fold a freshly loaded page into the held state.
    ///
    /// When the page starts with the held messages (same IDs, same order) and
    /// sits at the same offset, the held `Arc`s are kept, only the tail is
    /// appended and the cursor is left alone. Otherwise everything is replaced.
    pub fn apply(&mut self, page: MessagePage) -> PagerUpdate {
        let held = self.messages.len();
        let is_extension = !self.messages.is_empty()
            && page.offset == self.offset
            && page.messages.len() >= held
            && self
                .messages
                .iter()
                .zip(&page.messages)
                .all(|(old, new)| old.id == new.id);

        if !is_extension {
            self.replace(page);
            return PagerUpdate::Replaced;
        }

        self.total = page.total;
        let mut incoming = page.messages.into_iter();

        let mut changed = Vec::new();
        for (slot, new) in self.messages.iter_mut().zip(incoming.by_ref()) {
            if **slot != new {
                changed.push(new.id.clone());
                *slot = Arc::new(new);
            }
        }
        if !changed.is_empty() {
            // Rebuild derived views so they point at the new Arcs.
            self.turns = group_turns(&self.messages);
            self.summary = SessionSummary::from_messages(self.messages.iter().map(|m| &**m));
        }

        let tail: Vec<Arc<Message>> = incoming.map(Arc::new).collect();
        for msg in &tail {
            self.summary.add(msg);
        }
        extend_turns(&mut self.turns, &tail);
        let added = tail.len();
        self.messages.extend(tail);

        if added == 0 && changed.is_empty() {
            PagerUpdate::Unchanged
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                added,
                changed = changed.len(),
                "Messages updated in place"
            );
            PagerUpdate::Appended { added, changed }
        }
    }

    fn replace(&mut self, page: MessagePage) {
        self.offset = page.offset;
        self.total = page.total;
        self.messages = page.messages.into_iter().map(Arc::new).collect();
        self.turns = group_turns(&self.messages);
        self.summary = SessionSummary::from_messages(self.messages.iter().map(|m| &**m));
        self.cursor = self.cursor.min(self.messages.len().saturating_sub(1));
    }
}
