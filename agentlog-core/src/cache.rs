//! Staleness tokens and small in-memory caches.
//!
//! - [`StalenessTokens`]: one monotone counter per class of background work
//! - [`RenderCache`]: bounded LRU of formatted message content
//! - [`TtlCache`]: time-bounded memo for expensive external lookups

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

// ============================================
// Staleness tokens
// ============================================

/// Class of asynchronous work guarded by its own token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Preview,
    Messages,
    Search,
    Settle,
}

impl TokenKind {
    fn index(self) -> usize {
        match self {
            TokenKind::Preview => 0,
            TokenKind::Messages => 1,
            TokenKind::Search => 2,
            TokenKind::Settle => 3,
        }
    }
}

/// A result is accepted only if it carries the token current for its kind.
#[derive(Debug, Clone, Default)]
pub struct StalenessTokens {
    current: [u64; 4],
}

impl StalenessTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request of `kind`, superseding all earlier ones.
    pub fn next(&mut self, kind: TokenKind) -> u64 {
        let slot = &mut self.current[kind.index()];
        *slot += 1;
        *slot
    }

    pub fn current(&self, kind: TokenKind) -> u64 {
        self.current[kind.index()]
    }

    pub fn is_current(&self, kind: TokenKind, token: u64) -> bool {
        self.current(kind) == token
    }
}

// ============================================
// Render cache
// ============================================

pub const DEFAULT_RENDER_CACHE_ENTRIES: usize = 512;

/// Render cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub message_id: String,
    pub width: u16,
    pub expanded: bool,
}

impl RenderKey {
    pub fn new(message_id: impl Into<String>, width: u16, expanded: bool) -> Self {
        Self {
            message_id: message_id.into(),
            width,
            expanded,
        }
    }
}

struct RenderEntry<V> {
    value: V,
    last_used: AtomicU64,
}

struct RenderInner<V> {
    entries: HashMap<RenderKey, RenderEntry<V>>,
    expanded: HashSet<String>,
}

/// Memoized rendering of messages, keyed by `(message_id, width, expanded)`.
///
/// Lookups only take the read lock; recency is tracked with a per-entry
/// atomic so hits never contend with each other.
pub struct RenderCache<V> {
    inner: RwLock<RenderInner<V>>,
    clock: AtomicU64,
    capacity: usize,
}

impl<V: Clone> RenderCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RenderInner {
                entries: HashMap::new(),
                expanded: HashSet::new(),
            }),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &RenderKey) -> Option<V> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: RenderKey, value: V) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key,
            RenderEntry {
                value,
                last_used: AtomicU64::new(self.tick()),
            },
        );
    }

    /// Cached value for `key`, rendering and storing it on a miss.
    pub fn get_or_insert_with(&self, key: RenderKey, render: impl FnOnce() -> V) -> V {
        if let Some(hit) = self.get(&key) {
            return hit;
        }
        let value = render();
        self.insert(key, value.clone());
        value
    }

    /// Drop every entry for `message_id`, at any width or expansion.
    pub fn invalidate_message(&self, message_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.retain(|k, _| k.message_id != message_id);
    }

    pub fn invalidate_messages<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.invalidate_message(id);
        }
    }

    pub fn is_expanded(&self, message_id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.expanded.contains(message_id)
    }

    /// Flip the expansion of `message_id` and evict its entries. Returns the new state.
    pub fn toggle_expanded(&self, message_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let expanded = if inner.expanded.remove(message_id) {
            false
        } else {
            inner.expanded.insert(message_id.to_string());
            true
        };
        inner.entries.retain(|k, _| k.message_id != message_id);
        expanded
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for RenderCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_CACHE_ENTRIES)
    }
}

// ============================================
// TTL cache
// ============================================

pub const WORKTREE_CACHE_TTL: Duration = Duration::from_secs(5);

/// Values expire `ttl` after they were computed.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (at, _)| at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    /// Fresh cached value, or compute one outside the lock and store it.
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(hit) = self.get(&key) {
            return hit;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }
}

/// Paths of every worktree of the repository containing `repo`.
///
/// Empty when `repo` is not inside a git repository or git is unavailable.
pub fn worktree_paths(repo: &Path) -> Vec<PathBuf> {
    let output = match Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["worktree", "list", "--porcelain"])
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(repo = %repo.display(), error = %e, "git unavailable");
            return Vec::new();
        }
    };
    if !output.status.success() {
        return Vec::new();
    }
    parse_worktree_porcelain(&String::from_utf8_lossy(&output.stdout))
}

fn parse_worktree_porcelain(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect()
}

/// [`worktree_paths`] memoized for [`WORKTREE_CACHE_TTL`].
pub struct WorktreeCache {
    cache: TtlCache<PathBuf, Vec<PathBuf>>,
}

impl WorktreeCache {
    pub fn new() -> Self {
        Self {
            cache: TtlCache::new(WORKTREE_CACHE_TTL),
        }
    }

    pub fn paths(&self, repo: &Path) -> Vec<PathBuf> {
        self.cache
            .get_or_insert_with(repo.to_path_buf(), || worktree_paths(repo))
    }
}

impl Default for WorktreeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_staleness_tokens_are_independent() {
        let mut tokens = StalenessTokens::new();
        let preview = tokens.next(TokenKind::Preview);
        let stale = tokens.next(TokenKind::Search);
        let search = tokens.next(TokenKind::Search);

        assert!(tokens.is_current(TokenKind::Preview, preview));
        assert!(!tokens.is_current(TokenKind::Search, stale));
        assert!(tokens.is_current(TokenKind::Search, search));
        assert_eq!(tokens.current(TokenKind::Settle), 0);
    }

    #[test]
    fn test_render_cache_hit_and_miss() {
        let cache: RenderCache<String> = RenderCache::default();
        let renders = Cell::new(0);
        let render = || {
            renders.set(renders.get() + 1);
            "wrapped".to_string()
        };
        cache.get_or_insert_with(RenderKey::new("m1", 80, false), render);
        cache.get_or_insert_with(RenderKey::new("m1", 80, false), render);
        assert_eq!(renders.get(), 1);

        cache.get_or_insert_with(RenderKey::new("m1", 120, false), render);
        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn test_toggle_expanded_evicts_every_entry_of_message() {
        let cache = RenderCache::new(16);
        cache.insert(RenderKey::new("m1", 80, false), 1);
        cache.insert(RenderKey::new("m1", 120, false), 2);
        cache.insert(RenderKey::new("m2", 80, false), 3);

        assert!(cache.toggle_expanded("m1"));
        assert!(cache.is_expanded("m1"));
        assert_eq!(cache.get(&RenderKey::new("m1", 80, false)), None);
        assert_eq!(cache.get(&RenderKey::new("m1", 120, false)), None);
        assert_eq!(cache.get(&RenderKey::new("m2", 80, false)), Some(3));

        assert!(!cache.toggle_expanded("m1"));
        assert!(!cache.is_expanded("m1"));
    }

    #[test]
    fn test_render_cache_evicts_least_recently_used() {
        let cache = RenderCache::new(2);
        cache.insert(RenderKey::new("a", 80, false), 'a');
        cache.insert(RenderKey::new("b", 80, false), 'b');
        assert_eq!(cache.get(&RenderKey::new("a", 80, false)), Some('a'));
        cache.insert(RenderKey::new("c", 80, false), 'c');

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&RenderKey::new("b", 80, false)), None);
        assert_eq!(cache.get(&RenderKey::new("a", 80, false)), Some('a'));
    }

    #[test]
    fn test_ttl_cache_expires() {
        let cache = TtlCache::new(Duration::from_millis(30));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            calls.get()
        };
        assert_eq!(cache.get_or_insert_with("k", compute), 1);
        assert_eq!(cache.get_or_insert_with("k", compute), 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get_or_insert_with("k", compute), 2);
    }

    #[test]
    fn test_parse_worktree_porcelain() {
        let out = "worktree /src/app\nHEAD 1234\nbranch refs/heads/main\n\n\
                   worktree /src/app-feature\nHEAD 5678\ndetached\n";
        assert_eq!(
            parse_worktree_porcelain(out),
            vec![PathBuf::from("/src/app"), PathBuf::from("/src/app-feature")]
        );
    }

    #[test]
    fn test_worktree_paths_outside_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WorktreeCache::new();
        assert!(cache.paths(dir.path()).is_empty());
    }
}
