//! # agentlog-core
//!
//! Core library for agentlog - a dashboard over the session archives that
//! AI coding assistants leave on disk.
//!
//! This library provides:
//! - Canonical types for sessions, messages, content blocks and search hits
//! - Adapters that parse each assistant's append-only JSONL archives
//! - A filesystem watcher with event coalescing
//! - A concurrent session loader and a message pager
//! - A bounded, cancellable cross-session content search engine
//! - Staleness tokens, render caches, and export formatters
//! - Configuration management and logging infrastructure
//!
//! ## Data flow
//!
//! ```text
//! fs events ─► Watcher (per adapter) ─► WatchHub ─► Coalescer ─► refresh request
//!                                                                    │
//!                 SessionLoader ◄────────────────────────────────────┘
//!                      │
//!                      ▼
//!                 Adapter::sessions / Adapter::messages ─► canonical model ─► UI, search
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentlog_core::{adapter, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let adapters = adapter::create_all_adapters(&config);
//! let root = std::env::current_dir().unwrap();
//! for a in &adapters {
//!     if a.detect(&root).unwrap_or(false) {
//!         let sessions = a.sessions(&root).unwrap_or_default();
//!         println!("{}: {} sessions", a.name(), sessions.len());
//!     }
//! }
//! ```

// Re-export commonly used items at the crate root
pub use adapter::{Adapter, AdapterRef, MessagePage, MessageSearcher};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use loader::{MessagePager, PagerUpdate, SessionLoader};
pub use search::{ContentSearchEngine, SearchOptions, SearchResults};
pub use state::{CoreCommand, CoreMsg, SessionBrowser};
pub use types::*;
pub use watch::{CoalescedRefresh, Coalescer};

// Public modules
pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod loader;
pub mod logging;
pub mod search;
pub mod state;
pub mod summary;
pub mod types;
pub mod watch;
