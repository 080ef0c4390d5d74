//! Bounded, cancellable fan-out of a query across sessions.
//!
//! Sessions are scanned newest first. A semaphore limits how many searches
//! run at once, dispatch stops once the hard match cap is reached, and a
//! deadline cancels whatever is still running. Results are then cut down to
//! the visible cap at match granularity.

use super::{Matcher, SearchOptions};
use crate::adapter::AdapterRef;
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::types::{sort_sessions, Capability, MessageMatch, Session, SessionSearchResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one search run, tagged with the query that produced it.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub query: String,
    /// Sessions in newest-updated order, cut to the visible cap
    pub results: Vec<SessionSearchResult>,
    /// Matches found before capping
    pub total_matches: usize,
    /// More matches existed than are shown, or the deadline cut the run short
    pub truncated: bool,
    pub timed_out: bool,
}

impl SearchResults {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }

    /// Matches actually returned.
    pub fn visible_matches(&self) -> usize {
        self.results.iter().map(|r| r.match_count()).sum()
    }
}

/// Keep whole sessions while they fit under `cap`, then fill the remainder
/// from the next session's messages and matches.
pub fn apply_visible_cap(
    results: Vec<SessionSearchResult>,
    cap: usize,
) -> Vec<SessionSearchResult> {
    let mut remaining = cap;
    let mut out = Vec::new();

    for mut result in results {
        if remaining == 0 {
            break;
        }
        let count = result.match_count();
        if count <= remaining {
            remaining -= count;
            out.push(result);
            continue;
        }

        let mut kept: Vec<MessageMatch> = Vec::new();
        for mut message in result.messages {
            if remaining == 0 {
                break;
            }
            message.matches.truncate(remaining);
            remaining -= message.matches.len();
            kept.push(message);
        }
        result.messages = kept;
        out.push(result);
        break;
    }
    out
}

/// Cross-session search driver.
#[derive(Debug, Clone, Default)]
pub struct ContentSearchEngine {
    config: SearchConfig,
}

impl ContentSearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search `sessions` for `query`.
    ///
    /// Queries shorter than the minimum return immediately without touching
    /// any adapter. Adapters that cannot search are skipped. A failing
    /// session is logged and skipped. Cancelling `cancel` aborts the run with
    /// [`Error::Cancelled`]; the deadline instead returns partial results.
    pub async fn search(
        &self,
        query: &str,
        sessions: &[Session],
        adapters: &HashMap<String, AdapterRef>,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchResults> {
        if query.chars().count() < self.config.min_query_len.max(1) {
            return Ok(SearchResults::empty(query));
        }

        let matcher = Arc::new(Matcher::new(query, &options)?);
        let visible_cap = options.max_results.unwrap_or(self.config.visible_match_cap);
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.timeout();

        let mut ordered = sessions.to_vec();
        sort_sessions(&mut ordered);

        let workers = self.config.worker_count().max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let total = Arc::new(AtomicUsize::new(0));
        let token = cancel.child_token();
        let mut tasks: JoinSet<Option<(usize, Vec<MessageMatch>)>> = JoinSet::new();
        let mut timed_out = false;

        for (idx, session) in ordered.iter().enumerate() {
            if session.message_count == 0 {
                continue;
            }
            let Some(adapter) = adapters.get(&session.adapter_id) else {
                continue;
            };
            if !adapter.capabilities().contains(Capability::Search) || adapter.searcher().is_none()
            {
                continue;
            }
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    token.cancel();
                    break;
                }
                _ = token.cancelled() => break,
            };

            // Checked once a worker is free so finished sessions are counted
            if total.load(Ordering::Relaxed) >= self.config.hard_match_cap {
                tracing::debug!(
                    cap = self.config.hard_match_cap,
                    "Hard match cap reached, no further sessions dispatched"
                );
                break;
            }

            let adapter = Arc::clone(adapter);
            let matcher = Arc::clone(&matcher);
            let total = Arc::clone(&total);
            let worker_token = token.clone();
            let session_id = session.id.clone();

            tasks.spawn_blocking(move || {
                let _permit = permit;
                let searcher = adapter.searcher()?;
                match searcher.search_messages(&session_id, &matcher, &worker_token) {
                    Ok(found) => {
                        let count: usize = found.iter().map(|m| m.matches.len()).sum();
                        total.fetch_add(count, Ordering::Relaxed);
                        Some((idx, found))
                    }
                    Err(Error::Cancelled) => None,
                    Err(e) => {
                        tracing::debug!(
                            adapter = adapter.id(),
                            session = %session_id,
                            error = %e,
                            "Session search failed"
                        );
                        None
                    }
                }
            });
        }

        let mut found: Vec<(usize, Vec<MessageMatch>)> = Vec::new();
        loop {
            let next = if timed_out {
                tasks.join_next().await
            } else {
                tokio::select! {
                    next = tasks.join_next() => next,
                    _ = tokio::time::sleep_until(deadline) => {
                        timed_out = true;
                        token.cancel();
                        continue;
                    }
                }
            };
            match next {
                Some(Ok(Some(hit))) if !hit.1.is_empty() => found.push(hit),
                Some(Ok(_)) => {}
                Some(Err(e)) => tracing::warn!(error = %e, "Search worker panicked"),
                None => break,
            }
        }
        if timed_out {
            token.cancel();
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        found.sort_by_key(|(idx, _)| *idx);
        let results: Vec<SessionSearchResult> = found
            .into_iter()
            .map(|(idx, messages)| SessionSearchResult {
                session: ordered[idx].clone(),
                messages,
                collapsed: false,
            })
            .collect();

        let total_matches = total.load(Ordering::Relaxed);
        let results = apply_visible_cap(results, visible_cap);

        tracing::info!(
            query = %query,
            sessions = results.len(),
            total_matches,
            timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Content search finished"
        );

        Ok(SearchResults {
            query: query.to_string(),
            results,
            total_matches,
            truncated: total_matches > visible_cap || timed_out,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockKind, ContentMatch, Role};
    use chrono::{Duration, TimeZone, Utc};

    fn result_with(id: &str, per_message: &[usize]) -> SessionSearchResult {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        SessionSearchResult {
            session: Session {
                id: id.to_string(),
                adapter_id: "test".into(),
                adapter_name: "Test".into(),
                adapter_icon: "*".into(),
                name: id.to_string(),
                slug: None,
                created_at: t,
                updated_at: t + Duration::minutes(1),
                message_count: per_message.len(),
                total_tokens: 0,
                file_size: 0,
                path: Default::default(),
                cwd: None,
                git_branch: None,
                cli_version: None,
                model: None,
                is_huge: false,
            },
            messages: per_message
                .iter()
                .enumerate()
                .map(|(i, n)| MessageMatch {
                    message_id: format!("{}-{}", id, i),
                    role: Role::User,
                    timestamp: t,
                    matches: vec![
                        ContentMatch {
                            block: BlockKind::Text,
                            line_number: 1,
                            line: "test".into(),
                            col_start: 0,
                            col_end: 4,
                        };
                        *n
                    ],
                })
                .collect(),
            collapsed: false,
        }
    }

    #[test]
    fn test_visible_cap_cuts_at_match_level() {
        let results = vec![
            result_with("a", &[4, 4]),
            result_with("b", &[3, 3]),
            result_with("c", &[5]),
        ];
        let capped = apply_visible_cap(results, 11);
        let counts: Vec<_> = capped.iter().map(|r| r.match_count()).collect();
        assert_eq!(counts, vec![8, 3]);
        assert_eq!(capped[1].messages.len(), 1);
    }

    #[test]
    fn test_visible_cap_splits_inside_a_message() {
        let capped = apply_visible_cap(vec![result_with("a", &[2, 10])], 5);
        assert_eq!(capped[0].match_count(), 5);
        assert_eq!(capped[0].messages[1].matches.len(), 3);
    }

    #[test]
    fn test_visible_cap_keeps_everything_under_cap() {
        let capped = apply_visible_cap(vec![result_with("a", &[1]), result_with("b", &[2])], 100);
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_short_query_returns_immediately() {
        let engine = ContentSearchEngine::default();
        let out = engine
            .search(
                "t",
                &[result_with("a", &[1]).session],
                &HashMap::new(),
                SearchOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.results.is_empty());
        assert_eq!(out.query, "t");
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn test_invalid_regex_is_reported() {
        let engine = ContentSearchEngine::default();
        let options = SearchOptions {
            use_regex: true,
            ..SearchOptions::default()
        };
        let err = engine
            .search("([a", &[], &HashMap::new(), options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }
}
