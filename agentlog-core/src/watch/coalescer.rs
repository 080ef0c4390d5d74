//! Collapses bursts of change events into one refresh request.
//!
//! Every [`Coalescer::add`] restarts a quiet-window timer. When the timer
//! fires, the distinct sessions gathered so far are emitted as a single
//! [`CoalescedRefresh`]. An empty ID, or more distinct sessions than the
//! cap, turns the batch into a full refresh.
//!
//! The window grows by 100 ms for every `large_file_bytes` of the largest
//! file observed in the batch, up to 2 s, so that big sessions being
//! rewritten do not trigger a re-parse per write.

use crate::config::WatchConfig;
use crate::types::Event;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Extension added per `large_file_bytes` of observed file size.
const EXTENSION_STEP: Duration = Duration::from_millis(100);

/// Longest quiet window after extension.
const MAX_WINDOW: Duration = Duration::from_secs(2);

/// A session named in a batch. Without an adapter it matches that ID in any adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangedSession {
    pub adapter_id: Option<String>,
    pub session_id: String,
}

impl ChangedSession {
    pub fn matches(&self, adapter_id: &str, session_id: &str) -> bool {
        self.session_id == session_id
            && self.adapter_id.as_deref().map_or(true, |a| a == adapter_id)
    }
}

/// One flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedRefresh {
    /// Sorted; empty when `refresh_all` is set
    pub sessions: Vec<ChangedSession>,
    pub refresh_all: bool,
}

impl CoalescedRefresh {
    pub fn session_ids(&self) -> Vec<&str> {
        self.sessions.iter().map(|c| c.session_id.as_str()).collect()
    }

    /// Whether the batch covers the session `(adapter_id, session_id)`.
    pub fn touches(&self, adapter_id: &str, session_id: &str) -> bool {
        self.refresh_all || self.sessions.iter().any(|c| c.matches(adapter_id, session_id))
    }
}

#[derive(Debug)]
struct Inner {
    pending: HashSet<ChangedSession>,
    refresh_all: bool,
    largest_file: u64,
    /// Bumped on every add so a superseded timer never flushes
    generation: u64,
    timer: Option<JoinHandle<()>>,
    out: Option<mpsc::UnboundedSender<CoalescedRefresh>>,
}

/// Shared coalescing buffer. Clones feed the same batch.
#[derive(Debug, Clone)]
pub struct Coalescer {
    inner: Arc<Mutex<Inner>>,
    window: Duration,
    max_ids: usize,
    large_file_bytes: u64,
}

impl Coalescer {
    pub fn new(config: &WatchConfig) -> (Self, mpsc::UnboundedReceiver<CoalescedRefresh>) {
        let (coalescer, rx) = Self::with_window(config.coalesce_window(), config.max_coalesced_ids);
        (
            Self {
                large_file_bytes: config.large_file_bytes.max(1),
                ..coalescer
            },
            rx,
        )
    }

    pub fn with_window(
        window: Duration,
        max_ids: usize,
    ) -> (Self, mpsc::UnboundedReceiver<CoalescedRefresh>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            pending: HashSet::new(),
            refresh_all: false,
            largest_file: 0,
            generation: 0,
            timer: None,
            out: Some(tx),
        };
        let coalescer = Self {
            inner: Arc::new(Mutex::new(inner)),
            window,
            max_ids,
            large_file_bytes: WatchConfig::default().large_file_bytes,
        };
        (coalescer, rx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Quiet window for a batch whose largest file is `largest_file` bytes.
    pub fn window_for(&self, largest_file: u64) -> Duration {
        let steps = (largest_file / self.large_file_bytes).min(u32::MAX as u64) as u32;
        (self.window + EXTENSION_STEP * steps).min(MAX_WINDOW.max(self.window))
    }

    /// Enqueue a session ID from any adapter; `""` requests a full refresh.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, session_id: &str) {
        self.enqueue(None, session_id);
    }

    fn enqueue(&self, adapter_id: Option<&str>, session_id: &str) {
        let mut inner = self.lock();
        if inner.out.is_none() {
            return;
        }

        if session_id.is_empty() {
            inner.refresh_all = true;
            inner.pending.clear();
        } else if !inner.refresh_all {
            inner.pending.insert(ChangedSession {
                adapter_id: adapter_id.map(str::to_string),
                session_id: session_id.to_string(),
            });
            if inner.pending.len() > self.max_ids {
                tracing::debug!(
                    cap = self.max_ids,
                    "Too many sessions changed, escalating to full refresh"
                );
                inner.refresh_all = true;
                inner.pending.clear();
            }
        }

        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        let generation = inner.generation;
        let window = self.window_for(inner.largest_file);
        let shared = Arc::clone(&self.inner);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            flush(&shared, generation);
        }));
    }

    /// Record the size of a changed file; large files lengthen the window.
    pub fn observe_file_size(&self, size: u64) {
        let mut inner = self.lock();
        inner.largest_file = inner.largest_file.max(size);
    }

    /// Feed a watch event.
    pub fn add_event(&self, event: &Event) {
        if let Some(size) = event.file_size {
            self.observe_file_size(size);
        }
        self.enqueue(Some(&event.adapter_id), &event.session_id);
    }

    /// Cancel the pending timer and close the output. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.pending.clear();
        inner.refresh_all = false;
        if inner.out.take().is_some() {
            tracing::debug!("Coalescer stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().out.is_none()
    }
}

fn flush(shared: &Mutex<Inner>, generation: u64) {
    let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if inner.generation != generation {
        return;
    }
    inner.timer = None;

    let refresh_all = std::mem::take(&mut inner.refresh_all);
    let mut sessions: Vec<ChangedSession> = inner.pending.drain().collect();
    inner.largest_file = 0;
    if refresh_all {
        sessions.clear();
    }
    sessions.sort();

    if sessions.is_empty() && !refresh_all {
        return;
    }
    if let Some(out) = &inner.out {
        tracing::debug!(
            sessions = sessions.len(),
            refresh_all,
            "Flushing coalesced refresh"
        );
        let _ = out.send(CoalescedRefresh {
            sessions,
            refresh_all,
        });
    }
}
