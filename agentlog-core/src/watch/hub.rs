//! Merges every adapter's watch stream into one bounded channel.

use super::{try_forward, Coalescer, WatchCloser, WatchHandle};
use crate::adapter::AdapterRef;
use crate::config::WatchConfig;
use crate::types::{Capability, Event};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owner of all running adapter watchers.
pub struct WatchHub {
    merged: mpsc::Sender<Event>,
    closers: Vec<WatchCloser>,
    tasks: Vec<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl WatchHub {
    /// Create an empty hub and the merged event stream.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            merged: tx,
            closers: Vec::new(),
            tasks: Vec::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (hub, rx)
    }

    /// Start a watcher for every adapter that advertises [`Capability::Watch`].
    ///
    /// Adapters without the capability are skipped silently; a failing
    /// watcher is logged and skipped. Must be called within a tokio runtime.
    pub fn start(
        adapters: &[AdapterRef],
        project_root: &Path,
        config: &WatchConfig,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (mut hub, rx) = Self::new(config.channel_capacity);
        for adapter in adapters {
            if !adapter.capabilities().contains(Capability::Watch) {
                continue;
            }
            match adapter.watch(project_root, config) {
                Ok(Some(handle)) => hub.add(handle),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(adapter = adapter.id(), error = %e, "Failed to start watcher");
                }
            }
        }
        (hub, rx)
    }

    /// Forward one watcher's events into the merged stream.
    pub fn add(&mut self, handle: WatchHandle) {
        let adapter_id = handle.adapter_id();
        let (mut events, closer) = handle.into_parts();
        let merged = self.merged.clone();
        let dropped = Arc::clone(&self.dropped);

        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                try_forward(&merged, event, &dropped, "hub");
            }
            tracing::debug!(adapter = adapter_id, "Watch stream ended");
        }));
        self.closers.push(closer);
    }

    /// Number of running watchers.
    pub fn len(&self) -> usize {
        self.closers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closers.is_empty()
    }

    /// Events dropped because the merged stream was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close every watcher and stop forwarding.
    pub fn close(&mut self) {
        for closer in self.closers.drain(..) {
            closer.close();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for WatchHub {
    fn drop(&mut self) {
        self.close();
    }
}

/// Feed merged watch events into `coalescer` until the stream ends.
pub async fn pump(mut events: mpsc::Receiver<Event>, coalescer: Coalescer) {
    while let Some(event) = events.recv().await {
        coalescer.add_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_pump_feeds_coalescer() {
        let (tx, rx) = mpsc::channel(32);
        let (coalescer, mut refreshes) =
            Coalescer::with_window(Duration::from_millis(250), 10);
        let task = tokio::spawn(pump(rx, coalescer.clone()));

        for id in ["s1", "s2", "s1"] {
            tx.send(Event {
                kind: EventKind::MessageAdded,
                adapter_id: "claude-code".to_string(),
                session_id: id.to_string(),
                file_size: Some(10),
            })
            .await
            .unwrap();
        }

        let refresh = refreshes.recv().await.unwrap();
        assert_eq!(refresh.session_ids(), vec!["s1", "s2"]);
        assert!(refresh.touches("claude-code", "s1"));

        drop(tx);
        task.await.unwrap();
        coalescer.stop();
    }

    #[tokio::test]
    async fn test_start_without_watchable_adapters() {
        let dir = tempfile::tempdir().unwrap();
        let adapters = crate::adapter::create_all_adapters(&crate::Config {
            adapters: crate::config::AdapterOverrides {
                claude_code_path: Some(dir.path().join("claude")),
                codex_path: Some(dir.path().join("codex")),
            },
            ..Default::default()
        });
        let (mut hub, _rx) = WatchHub::start(&adapters, dir.path(), &WatchConfig::default());
        assert!(hub.is_empty());
        assert_eq!(hub.dropped(), 0);
        hub.close();
    }
}
