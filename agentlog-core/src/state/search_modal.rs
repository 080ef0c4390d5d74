//! Content search modal state machine.
//!
//! ```text
//!            open            type (<min)          type (>=min)
//!  Closed ─────────► OpenEmpty ───────► OpenShort ───────► OpenSearching
//!    ▲                    ▲  clear           ▲                  │   ▲
//!    │ Esc (any open)     └──────────────────┴──── edit ────────┤   │ edit (>=min)
//!    │                                                          ▼   │
//!    └──────────────────────────────────────── OpenResults / OpenError
//! ```
//!
//! Debounce messages are accepted only when their version is current, and
//! results only when both their version and their query still match.

use crate::error::{Error, Result};
use crate::search::{ContentSearchDebounce, SearchDebouncer, SearchOptions, SearchResults};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalState {
    #[default]
    Closed,
    OpenEmpty,
    /// Query is shorter than the minimum length
    OpenShort,
    /// Waiting for the debounce or for a running search
    OpenSearching,
    OpenResults,
    OpenError,
}

impl ModalState {
    pub fn is_open(&self) -> bool {
        !matches!(self, ModalState::Closed)
    }
}

/// Work the runtime must perform on behalf of the modal.
#[derive(Debug, Clone, PartialEq)]
pub enum ModalCommand {
    /// Deliver `msg` back after `delay`
    Debounce {
        msg: ContentSearchDebounce,
        delay: Duration,
    },
    /// Run the engine; tag the result with `version`
    StartSearch {
        version: u64,
        query: String,
        options: SearchOptions,
    },
    /// Abort whatever search is running
    CancelSearch,
}

#[derive(Debug)]
pub struct ContentSearchModal {
    state: ModalState,
    query: String,
    options: SearchOptions,
    debouncer: SearchDebouncer,
    min_query_len: usize,
    results: Option<SearchResults>,
    error: Option<String>,
    selected: usize,
}

impl ContentSearchModal {
    pub fn new(debounce: Duration, min_query_len: usize) -> Self {
        Self {
            state: ModalState::Closed,
            query: String::new(),
            options: SearchOptions::default(),
            debouncer: SearchDebouncer::new(debounce),
            min_query_len: min_query_len.max(1),
            results: None,
            error: None,
            selected: 0,
        }
    }

    pub fn state(&self) -> ModalState {
        self.state
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    pub fn version(&self) -> u64 {
        self.debouncer.version()
    }

    pub fn results(&self) -> Option<&SearchResults> {
        self.results.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn open(&mut self) {
        if self.state.is_open() {
            return;
        }
        self.debouncer.cancel();
        self.query.clear();
        self.results = None;
        self.error = None;
        self.selected = 0;
        self.state = ModalState::OpenEmpty;
    }

    /// Escape.
    pub fn close(&mut self) -> Option<ModalCommand> {
        if !self.state.is_open() {
            return None;
        }
        let was_searching = self.state == ModalState::OpenSearching;
        self.debouncer.cancel();
        self.state = ModalState::Closed;
        was_searching.then_some(ModalCommand::CancelSearch)
    }

    pub fn push_char(&mut self, c: char) -> Option<ModalCommand> {
        let mut query = self.query.clone();
        query.push(c);
        self.set_query(&query)
    }

    pub fn backspace(&mut self) -> Option<ModalCommand> {
        let mut query = self.query.clone();
        query.pop();
        self.set_query(&query)
    }

    /// Replace the query text.
    pub fn set_query(&mut self, query: &str) -> Option<ModalCommand> {
        if !self.state.is_open() {
            return None;
        }
        let was_searching = self.state == ModalState::OpenSearching;
        self.query = query.to_string();
        self.error = None;

        let len = self.query.chars().count();
        if len < self.min_query_len {
            self.debouncer.cancel();
            self.results = None;
            self.state = if len == 0 {
                ModalState::OpenEmpty
            } else {
                ModalState::OpenShort
            };
            return was_searching.then_some(ModalCommand::CancelSearch);
        }

        self.state = ModalState::OpenSearching;
        Some(ModalCommand::Debounce {
            msg: self.debouncer.next(&self.query),
            delay: self.debouncer.delay(),
        })
    }

    pub fn toggle_case_sensitive(&mut self) -> Option<ModalCommand> {
        self.options.case_sensitive = !self.options.case_sensitive;
        let query = self.query.clone();
        self.set_query(&query)
    }

    pub fn toggle_regex(&mut self) -> Option<ModalCommand> {
        self.options.use_regex = !self.options.use_regex;
        let query = self.query.clone();
        self.set_query(&query)
    }

    /// A debounce delay elapsed.
    pub fn on_debounce(&mut self, msg: &ContentSearchDebounce) -> Option<ModalCommand> {
        if self.state != ModalState::OpenSearching || !self.debouncer.is_current(msg) {
            return None;
        }
        Some(ModalCommand::StartSearch {
            version: msg.version,
            query: msg.query.clone(),
            options: self.options,
        })
    }

    /// A search finished. Returns true if the result was accepted.
    pub fn on_result(&mut self, version: u64, result: Result<SearchResults>) -> bool {
        if self.state != ModalState::OpenSearching || version != self.debouncer.version() {
            return false;
        }
        match result {
            Ok(results) if results.query == self.query => {
                self.results = Some(results);
                self.selected = 0;
                self.state = ModalState::OpenResults;
                true
            }
            Ok(_) | Err(Error::Cancelled) => false,
            Err(e) => {
                self.error = Some(e.to_string());
                self.results = None;
                self.state = ModalState::OpenError;
                true
            }
        }
    }

    /// Rows in the flattened result list.
    pub fn row_count(&self) -> usize {
        self.results
            .as_ref()
            .map(|r| r.results.iter().map(|s| s.flat_len()).sum())
            .unwrap_or(0)
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.row_count() {
            self.selected += 1;
        }
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Collapse or expand the session group containing the selected row.
    pub fn toggle_collapse(&mut self) {
        let Some(results) = self.results.as_mut() else {
            return;
        };
        let mut start = 0;
        for group in &mut results.results {
            let len = group.flat_len();
            if self.selected < start + len {
                group.collapsed = !group.collapsed;
                self.selected = start;
                return;
            }
            start += len;
        }
    }
}

impl Default for ContentSearchModal {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_for(query: &str) -> SearchResults {
        SearchResults {
            query: query.to_string(),
            ..SearchResults::default()
        }
    }

    fn debounce_msg(cmd: Option<ModalCommand>) -> ContentSearchDebounce {
        match cmd {
            Some(ModalCommand::Debounce { msg, .. }) => msg,
            other => panic!("expected debounce, got {:?}", other),
        }
    }

    #[test]
    fn test_open_type_short_then_long() {
        let mut modal = ContentSearchModal::default();
        assert_eq!(modal.set_query("ignored"), None);
        modal.open();
        assert_eq!(modal.state(), ModalState::OpenEmpty);

        assert_eq!(modal.push_char('t'), None);
        assert_eq!(modal.state(), ModalState::OpenShort);

        let msg = debounce_msg(modal.push_char('e'));
        assert_eq!(modal.state(), ModalState::OpenSearching);
        assert_eq!(msg.query, "te");

        let start = modal.on_debounce(&msg);
        assert!(matches!(start, Some(ModalCommand::StartSearch { version, .. }) if version == msg.version));
    }

    #[test]
    fn test_stale_debounce_and_result_are_ignored() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        let v1 = debounce_msg(modal.set_query("te"));
        let v2 = debounce_msg(modal.set_query("test"));
        assert_eq!((v1.version + 1), v2.version);

        assert_eq!(modal.on_debounce(&v1), None);
        assert!(modal.on_debounce(&v2).is_some());

        // Version 1 finishes late while version 2 is in flight.
        assert!(!modal.on_result(v1.version, Ok(results_for("te"))));
        assert_eq!(modal.state(), ModalState::OpenSearching);
        assert!(modal.results().is_none());

        assert!(modal.on_result(v2.version, Ok(results_for("test"))));
        assert_eq!(modal.state(), ModalState::OpenResults);
        assert_eq!(modal.results().unwrap().query, "test");
    }

    #[test]
    fn test_result_for_other_query_is_ignored() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        let msg = debounce_msg(modal.set_query("abc"));
        assert!(!modal.on_result(msg.version, Ok(results_for("xyz"))));
        assert_eq!(modal.state(), ModalState::OpenSearching);
    }

    #[test]
    fn test_error_and_edit_returns_to_searching() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        let msg = debounce_msg(modal.set_query("(["));
        assert!(modal.on_result(msg.version, Err(Error::InvalidQuery("bad".into()))));
        assert_eq!(modal.state(), ModalState::OpenError);
        assert!(modal.error().unwrap().contains("bad"));

        debounce_msg(modal.set_query("([a"));
        assert_eq!(modal.state(), ModalState::OpenSearching);
        assert!(modal.error().is_none());
    }

    #[test]
    fn test_cancelled_result_is_silent() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        let msg = debounce_msg(modal.set_query("query"));
        assert!(!modal.on_result(msg.version, Err(Error::Cancelled)));
        assert_eq!(modal.state(), ModalState::OpenSearching);
    }

    #[test]
    fn test_escape_closes_and_cancels() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        let msg = debounce_msg(modal.set_query("query"));
        assert_eq!(modal.close(), Some(ModalCommand::CancelSearch));
        assert_eq!(modal.state(), ModalState::Closed);
        assert_eq!(modal.on_debounce(&msg), None);
        assert_eq!(modal.close(), None);
    }

    #[test]
    fn test_clearing_query_returns_to_empty() {
        let mut modal = ContentSearchModal::default();
        modal.open();
        debounce_msg(modal.set_query("ab"));
        assert_eq!(modal.backspace(), Some(ModalCommand::CancelSearch));
        assert_eq!(modal.state(), ModalState::OpenShort);
        assert_eq!(modal.backspace(), None);
        assert_eq!(modal.state(), ModalState::OpenEmpty);
    }
}
