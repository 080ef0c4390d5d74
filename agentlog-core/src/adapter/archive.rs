//! Per-session parse cache shared by the JSONL adapters.
//!
//! Each archive is parsed once and then resumed from its last byte offset
//! whenever the file grows. A shrunken or rewritten file is parsed again
//! from the start.
//!
//! Parser state that only correlates records inside one pass (the tool call
//! index) is rebuilt by [`RecordParser::begin`] at the start of every pass
//! rather than trusted across calls.

use super::scan::scan_lines;
use crate::config::TimestampSource;
use crate::error::{Error, Result};
use crate::format::{short_id, truncate_runes};
use crate::types::{Message, Session, TokenUsage, UsageStats};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// Longest derived session name, in runes.
pub const SESSION_NAME_MAX_RUNES: usize = 50;

/// Facts about a session gathered while parsing its records.
#[derive(Debug, Clone, Default)]
pub struct SessionFacts {
    /// Session ID carried by the records themselves
    pub session_id: Option<String>,
    pub first_record_at: Option<DateTime<Utc>>,
    pub last_record_at: Option<DateTime<Utc>>,
    /// Start time from a session metadata record
    pub meta_started_at: Option<DateTime<Utc>>,
    pub cwd: Option<PathBuf>,
    pub git_branch: Option<String>,
    pub cli_version: Option<String>,
    pub slug: Option<String>,
    /// Last model seen
    pub model: Option<String>,
    /// First genuine user utterance
    pub first_prompt: Option<String>,
    /// Running token total
    pub usage: TokenUsage,
    /// File modification time at the first parse pass
    pub file_modified_at: Option<DateTime<Utc>>,
    pub skipped_lines: usize,
}

impl SessionFacts {
    pub fn observe_timestamp(&mut self, ts: DateTime<Utc>) {
        if self.first_record_at.map_or(true, |first| ts < first) {
            self.first_record_at = Some(ts);
        }
        if self.last_record_at.map_or(true, |last| ts > last) {
            self.last_record_at = Some(ts);
        }
    }

    /// Timestamp for a record: its own, else the latest seen, else the file mtime.
    pub fn timestamp_or_last(&self, ts: Option<DateTime<Utc>>) -> DateTime<Utc> {
        ts.or(self.last_record_at)
            .or(self.file_modified_at)
            .unwrap_or_default()
    }

    /// Called from [`RecordParser::begin`]; the first pass's mtime sticks.
    pub fn observe_file_modified(&mut self, modified: Option<DateTime<Utc>>) {
        if self.file_modified_at.is_none() {
            self.file_modified_at = modified;
        }
    }

    /// Keep the first non-empty value seen.
    pub fn remember(slot: &mut Option<String>, value: Option<String>) {
        if slot.is_none() {
            *slot = value.filter(|v| !v.is_empty());
        }
    }

    /// Display name: slug, else first prompt, else short ID.
    pub fn display_name(&self, session_id: &str) -> String {
        if let Some(slug) = self.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            return slug.to_string();
        }
        if let Some(prompt) = self.first_prompt.as_deref() {
            let line = prompt.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
            if !line.is_empty() {
                return truncate_runes(&line, SESSION_NAME_MAX_RUNES);
            }
        }
        short_id(session_id).to_string()
    }
}

/// Parse an RFC 3339 timestamp, normalized to UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Flatten a tool output payload (string, array of text parts, or object) to text.
pub fn flatten_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                other => other
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other
            .get("output")
            .and_then(|o| o.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Index every tool call in `messages` by call ID: `(message index, tool index)`.
pub fn index_tool_uses(messages: &[Message]) -> HashMap<String, (usize, usize)> {
    let mut index = HashMap::new();
    for (mi, msg) in messages.iter().enumerate() {
        for (ti, tool) in msg.tool_uses.iter().enumerate() {
            index.insert(tool.id.clone(), (mi, ti));
        }
    }
    index
}

/// Incremental record parser for one archive format.
pub trait RecordParser: Clone + Default + Send + Sync + 'static {
    /// Prepare for a scan pass. `fallback_id` is the file-derived session ID
    /// and `modified` the file's modification time.
    fn begin(&mut self, fallback_id: &str, modified: Option<DateTime<Utc>>);

    /// Consume one line; `Err` carries the reason the line was skipped.
    fn push_line(&mut self, line: &str) -> std::result::Result<(), String>;

    fn messages(&self) -> &[Message];

    fn facts(&self) -> &SessionFacts;
}

/// Parsed state of one archive file.
#[derive(Debug, Clone)]
pub struct ParsedArchive<P> {
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Offset just past the last consumed line
    pub offset: u64,
    pub parser: P,
    /// A line exceeded the scanner limit; everything after it is unknown
    pub huge: bool,
}

impl<P: RecordParser> ParsedArchive<P> {
    fn fresh() -> Self {
        Self {
            size: 0,
            modified: None,
            offset: 0,
            parser: P::default(),
            huge: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.parser.messages()
    }

    pub fn facts(&self) -> &SessionFacts {
        self.parser.facts()
    }

    pub fn usage_stats(&self) -> UsageStats {
        let facts = self.facts();
        UsageStats {
            totals: facts.usage,
            message_count: self.messages().len(),
            model: facts.model.clone(),
        }
    }
}

/// Identity of the adapter building a [`Session`].
#[derive(Debug, Clone, Copy)]
pub struct AdapterInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
}

impl AdapterInfo {
    /// Assemble a session from a parsed archive.
    ///
    /// `created_at` follows `fallback`, ending at the file modification time.
    pub fn build_session<P: RecordParser>(
        &self,
        session_id: &str,
        path: &Path,
        archive: &ParsedArchive<P>,
        fallback: &[TimestampSource],
    ) -> Session {
        let facts = archive.facts();
        let mtime: DateTime<Utc> = archive
            .modified
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        let created_at = fallback
            .iter()
            .find_map(|source| match source {
                TimestampSource::FirstRecord => facts.first_record_at,
                TimestampSource::SessionMeta => facts.meta_started_at,
                TimestampSource::FileMtime => Some(mtime),
            })
            .unwrap_or(mtime);
        let updated_at = facts
            .last_record_at
            .map_or(mtime, |last| last.max(created_at));

        Session {
            id: session_id.to_string(),
            adapter_id: self.id.to_string(),
            adapter_name: self.name.to_string(),
            adapter_icon: self.icon.to_string(),
            name: facts.display_name(session_id),
            slug: facts.slug.clone(),
            created_at,
            updated_at,
            message_count: archive.messages().len(),
            total_tokens: facts.usage.total(),
            file_size: archive.size,
            path: path.to_path_buf(),
            cwd: facts.cwd.clone(),
            git_branch: facts.git_branch.clone(),
            cli_version: facts.cli_version.clone(),
            model: facts.model.clone(),
            is_huge: archive.huge,
        }
    }
}

/// Cache of parsed archives keyed by file path.
pub struct ArchiveCache<P> {
    adapter: &'static str,
    entries: RwLock<HashMap<PathBuf, Arc<ParsedArchive<P>>>>,
}

impl<P: RecordParser> ArchiveCache<P> {
    pub fn new(adapter: &'static str) -> Self {
        Self {
            adapter,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Parse `path`, reusing and extending any cached state.
    ///
    /// An unchanged file is returned from cache without touching its contents.
    pub fn load(
        &self,
        path: &Path,
        fallback_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<ParsedArchive<P>>> {
        let meta = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let size = meta.len();
        let modified = meta.modified().ok();

        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();

        let mut state = match cached {
            Some(entry) if entry.size == size && entry.modified == modified => return Ok(entry),
            Some(entry) if size > entry.size && !entry.huge => {
                tracing::debug!(
                    adapter = self.adapter,
                    path = %path.display(),
                    from = entry.offset,
                    "Resuming parse"
                );
                (*entry).clone()
            }
            Some(entry) => {
                tracing::debug!(
                    adapter = self.adapter,
                    path = %path.display(),
                    old_size = entry.size,
                    new_size = size,
                    "Archive rewritten, parsing from start"
                );
                ParsedArchive::fresh()
            }
            None => ParsedArchive::fresh(),
        };

        state
            .parser
            .begin(fallback_id, modified.map(DateTime::<Utc>::from));
        let parser = &mut state.parser;
        let adapter = self.adapter;
        let outcome = scan_lines(path, state.offset, cancel, |line| {
            if let Err(reason) = parser.push_line(line) {
                tracing::debug!(adapter, path = %path.display(), reason = %reason, "Skipping record");
            }
        });

        match outcome {
            Ok(progress) => state.offset = progress.offset,
            Err(Error::LineTooLong { limit, .. }) => {
                tracing::warn!(
                    adapter = self.adapter,
                    path = %path.display(),
                    limit,
                    "Line exceeds scanner limit, session is partial"
                );
                state.huge = true;
            }
            Err(e) => return Err(e),
        }

        state.size = size.max(state.offset);
        state.modified = modified;

        let entry = Arc::new(state);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Cached state without touching the file.
    pub fn peek(&self, path: &Path) -> Option<Arc<ParsedArchive<P>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn forget(&self, path: &Path) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}
