//! Cross-session content search.
//!
//! [`ContentSearchEngine`] fans a compiled [`Matcher`] out to every adapter
//! that can search, bounded by a semaphore and a deadline.
//! [`SearchDebouncer`] decides which typed query actually gets run.

pub mod debounce;
pub mod engine;
pub mod matcher;

pub use debounce::{ContentSearchDebounce, SearchDebouncer};
pub use engine::{apply_visible_cap, ContentSearchEngine, SearchResults};
pub use matcher::Matcher;

use serde::{Deserialize, Serialize};

/// How a query is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    /// Treat the query as a regular expression instead of a literal
    pub use_regex: bool,
    /// Visible match cap; `None` uses the configured cap
    pub max_results: Option<usize>,
}
