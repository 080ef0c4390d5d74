//! Live updates from the archive directories.
//!
//! Each adapter owns a debounced filesystem watcher ([`watch_paths`]) that
//! turns raw notifications on `.jsonl` files into [`Event`]s. A
//! [`WatchHub`] merges every adapter's stream into one bounded channel and
//! the [`Coalescer`] collapses bursts into a single refresh request.
//!
//! All sends between stages are non-blocking; an overflowing channel drops
//! the event, and a later refresh still observes the change on disk.

pub mod coalescer;
pub mod hub;

pub use coalescer::{ChangedSession, CoalescedRefresh, Coalescer};
pub use hub::WatchHub;

use crate::config::WatchConfig;
use crate::error::Result;
use crate::types::{Event, EventKind};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Maps an archive path to its session ID; `None` ignores the path.
pub type SessionIdFn = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

/// What an adapter wants watched.
pub struct WatchTarget {
    pub adapter_id: &'static str,
    pub dirs: Vec<PathBuf>,
    pub recursive: bool,
    pub session_id: SessionIdFn,
}

/// Stops a watcher. Closing twice is a no-op.
pub struct WatchCloser {
    adapter_id: &'static str,
    debouncer: Mutex<Option<Debouncer<notify::RecommendedWatcher>>>,
}

impl WatchCloser {
    pub fn close(&self) {
        let taken = self
            .debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            tracing::debug!(adapter = self.adapter_id, "Watcher closed");
        }
    }
}

/// A running watcher and its event stream.
///
/// The stream ends once the watcher is closed.
pub struct WatchHandle {
    adapter_id: &'static str,
    events: mpsc::Receiver<Event>,
    closer: WatchCloser,
    dropped: Arc<AtomicU64>,
}

impl WatchHandle {
    pub fn adapter_id(&self) -> &'static str {
        self.adapter_id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Events dropped because the stream was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closer.close();
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Event>, WatchCloser) {
        (self.events, self.closer)
    }
}

/// Non-blocking send that counts and logs drops instead of waiting.
pub(crate) fn try_forward(
    tx: &mpsc::Sender<Event>,
    event: Event,
    dropped: &AtomicU64,
    stage: &'static str,
) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if count == 1 || count % 100 == 0 {
                tracing::warn!(
                    stage,
                    adapter = %event.adapter_id,
                    dropped_total = count,
                    "Watch channel full, event dropped"
                );
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

fn is_jsonl(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

/// Turns debounced paths into typed events by comparing file sizes.
pub(crate) struct EventClassifier {
    adapter_id: &'static str,
    session_id: SessionIdFn,
    sizes: HashMap<PathBuf, u64>,
}

impl EventClassifier {
    pub(crate) fn new(adapter_id: &'static str, session_id: SessionIdFn) -> Self {
        Self {
            adapter_id,
            session_id,
            sizes: HashMap::new(),
        }
    }

    /// Record the sizes of archives that already exist.
    pub(crate) fn seed(&mut self, dirs: &[PathBuf], recursive: bool) {
        for dir in dirs {
            let pattern = if recursive {
                dir.join("**").join("*.jsonl")
            } else {
                dir.join("*.jsonl")
            };
            let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
                continue;
            };
            for path in paths.flatten() {
                if let Ok(meta) = std::fs::metadata(&path) {
                    self.sizes.insert(path, meta.len());
                }
            }
        }
    }

    /// Vanished: deleted. First sight: created. Grew: message added. Otherwise: updated.
    pub(crate) fn classify(&mut self, path: &Path) -> Option<Event> {
        if !is_jsonl(path) {
            return None;
        }
        let session_id = (self.session_id)(path)?;

        let (kind, file_size) = match std::fs::metadata(path) {
            Err(_) => {
                self.sizes.remove(path);
                (EventKind::SessionDeleted, None)
            }
            Ok(meta) if meta.is_dir() => return None,
            Ok(meta) => {
                let size = meta.len();
                let kind = match self.sizes.insert(path.to_path_buf(), size) {
                    None => EventKind::SessionCreated,
                    Some(previous) if size > previous => EventKind::MessageAdded,
                    Some(_) => EventKind::SessionUpdated,
                };
                (kind, Some(size))
            }
        };

        Some(Event {
            kind,
            adapter_id: self.adapter_id.to_string(),
            session_id,
            file_size,
        })
    }
}

/// Watch `target` with a debounced filesystem watcher.
///
/// Watch errors are logged and the watcher keeps running.
pub fn watch_paths(target: WatchTarget, config: &WatchConfig) -> Result<WatchHandle> {
    let WatchTarget {
        adapter_id,
        dirs,
        recursive,
        session_id,
    } = target;

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&dropped);

    let mut classifier = EventClassifier::new(adapter_id, session_id);
    classifier.seed(&dirs, recursive);

    let mut debouncer = new_debouncer(config.debounce(), move |res: DebounceEventResult| {
        match res {
            Ok(events) => {
                for debounced in events {
                    if let Some(event) = classifier.classify(&debounced.path) {
                        tracing::trace!(
                            adapter = adapter_id,
                            kind = ?event.kind,
                            session = %event.session_id,
                            "Watch event"
                        );
                        try_forward(&tx, event, &counter, "watcher");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(adapter = adapter_id, error = ?e, "Watch error");
            }
        }
    })?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    for dir in &dirs {
        debouncer.watcher().watch(dir, mode)?;
        tracing::info!(adapter = adapter_id, dir = %dir.display(), "Watching");
    }

    Ok(WatchHandle {
        adapter_id,
        events: rx,
        closer: WatchCloser {
            adapter_id,
            debouncer: Mutex::new(Some(debouncer)),
        },
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem_id() -> SessionIdFn {
        Arc::new(|path: &Path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
    }

    #[test]
    fn test_classify_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jsonl");
        let mut classifier = EventClassifier::new("test", stem_id());

        std::fs::write(&path, "{}\n").unwrap();
        let created = classifier.classify(&path).unwrap();
        assert_eq!(created.kind, EventKind::SessionCreated);
        assert_eq!(created.session_id, "abc");
        assert_eq!(created.file_size, Some(3));

        std::fs::write(&path, "{}\n{}\n").unwrap();
        assert_eq!(
            classifier.classify(&path).unwrap().kind,
            EventKind::MessageAdded
        );

        std::fs::write(&path, "{}\n").unwrap();
        assert_eq!(
            classifier.classify(&path).unwrap().kind,
            EventKind::SessionUpdated
        );

        std::fs::remove_file(&path).unwrap();
        let deleted = classifier.classify(&path).unwrap();
        assert_eq!(deleted.kind, EventKind::SessionDeleted);
        assert_eq!(deleted.file_size, None);
    }

    #[test]
    fn test_classify_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "x").unwrap();
        let mut classifier = EventClassifier::new("test", stem_id());
        assert!(classifier.classify(&path).is_none());

        let rejecting: SessionIdFn = Arc::new(|_: &Path| None);
        let mut classifier = EventClassifier::new("test", rejecting);
        let jsonl = dir.path().join("a.jsonl");
        std::fs::write(&jsonl, "{}").unwrap();
        assert!(classifier.classify(&jsonl).is_none());
    }

    #[test]
    fn test_seeded_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jsonl");
        std::fs::write(&path, "{}\n").unwrap();

        let mut classifier = EventClassifier::new("test", stem_id());
        classifier.seed(&[dir.path().to_path_buf()], false);
        assert_eq!(
            classifier.classify(&path).unwrap().kind,
            EventKind::SessionUpdated
        );
    }

    #[test]
    fn test_try_forward_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = AtomicU64::new(0);
        try_forward(&tx, Event::refresh_all("a"), &dropped, "test");
        try_forward(&tx, Event::refresh_all("b"), &dropped, "test");
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.try_recv().unwrap().adapter_id, "a");
    }

    #[tokio::test]
    async fn test_watch_paths_reports_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.jsonl");
        std::fs::write(&path, "{}\n").unwrap();

        let target = WatchTarget {
            adapter_id: "test",
            dirs: vec![dir.path().to_path_buf()],
            recursive: false,
            session_id: stem_id(),
        };
        let mut handle = watch_paths(target, &WatchConfig::default()).unwrap();

        std::fs::write(&path, "{}\n{}\n").unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(5), handle.recv())
            .await
            .expect("no watch event")
            .unwrap();
        assert_eq!(event.session_id, "live");
        assert_eq!(event.kind, EventKind::MessageAdded);

        handle.close();
        handle.close();
    }
}
