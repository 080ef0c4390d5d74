//! Claude Code adapter
//!
//! Reads session logs from `~/.claude/projects/[encoded-path]/*.jsonl`, where
//! the encoded path is the project's absolute path with every separator
//! replaced by `-`.
//!
//! # Record handling
//!
//! - `user` and `assistant` records become messages, one per record.
//! - A `user` record holding only tool results produces no message: each
//!   result is merged into the assistant message that issued the call.
//!   Results with no matching call stay on the user message as orphans.
//! - Sidechain records (sub-agent traffic) and `isMeta` records are skipped.
//! - Every other record type only contributes metadata (cwd, version,
//!   git branch, slug, timestamps).
//! - Claude writes one record per content block of a streamed response,
//!   each repeating the response's usage; usage is counted once per
//!   response ID.

use super::archive::{
    flatten_text, index_tool_uses, parse_timestamp, AdapterInfo, ArchiveCache, RecordParser,
    SessionFacts,
};
use super::scan::MAX_LINE_BYTES;
use super::{Adapter, MessagePage, MessageSearcher};
use crate::config::{TimestampSource, TimestampConfig, WatchConfig};
use crate::error::{Error, Result};
use crate::search::Matcher;
use crate::types::{
    sort_sessions, Capabilities, Message, MessageMatch, Role, Session, TokenUsage, UsageStats,
};
use crate::watch::{watch_paths, WatchHandle, WatchTarget};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub const ADAPTER_ID: &str = "claude-code";

const INFO: AdapterInfo = AdapterInfo {
    id: ADAPTER_ID,
    name: "Claude Code",
    icon: "◆",
};

/// Encode a project path the way Claude Code names its project directories.
pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Session ID of a Claude Code archive: the file stem.
///
/// Sub-agent transcripts (`agent-*.jsonl`) are not sessions.
pub fn session_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with("agent-") {
        return None;
    }
    Some(stem.to_string())
}

/// Encoded directory names under `projects/` for `project_root` and its canonical form.
fn project_dir_names(project_root: &Path) -> Vec<String> {
    let mut names = vec![encode_project_path(project_root)];
    if let Ok(canonical) = project_root.canonicalize() {
        let name = encode_project_path(&canonical);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Session ID for an archive directly inside one of `dir_names`.
fn project_session_id(path: &Path, dir_names: &[String]) -> Option<String> {
    let parent = path.parent()?.file_name()?.to_str()?;
    if !dir_names.iter().any(|name| name == parent) {
        return None;
    }
    session_id_from_path(path)
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Represents a single line from a Claude Code JSONL log.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    session_id: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    version: Option<String>,
    git_branch: Option<String>,
    is_sidechain: Option<bool>,
    is_meta: Option<bool>,
    slug: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    model: Option<String>,
    id: Option<String>,
    content: Option<RawContent>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    // Images, redacted thinking, and anything newer
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

impl From<RawUsage> for TokenUsage {
    fn from(raw: RawUsage) -> Self {
        TokenUsage::new(
            raw.input_tokens.unwrap_or(0),
            raw.output_tokens.unwrap_or(0),
            raw.cache_read_input_tokens.unwrap_or(0),
            raw.cache_creation_input_tokens.unwrap_or(0),
        )
    }
}

/// Whether user text is something the person typed rather than injected markup.
fn is_user_prompt(text: &str) -> bool {
    let trimmed = text.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('<')
}

// ============================================
// Parser
// ============================================

/// Incremental parser state for one Claude Code session.
#[derive(Debug, Clone, Default)]
pub struct ClaudeParser {
    fallback_id: String,
    messages: Vec<Message>,
    facts: SessionFacts,
    /// call ID -> (message index, tool index); rebuilt every pass
    tool_index: HashMap<String, (usize, usize)>,
    last_response_id: Option<String>,
}

impl ClaudeParser {
    fn session_id(&self) -> &str {
        self.facts.session_id.as_deref().unwrap_or(&self.fallback_id)
    }

    fn message_id(&self, uuid: Option<String>) -> String {
        uuid.filter(|u| !u.is_empty())
            .unwrap_or_else(|| format!("{}#{}", self.session_id(), self.messages.len()))
    }

    /// Merge a result into the message holding its call. False when no call matches.
    fn attach_result(&mut self, tool_use_id: &str, output: &str, is_error: bool) -> bool {
        let Some(&(mi, ti)) = self.tool_index.get(tool_use_id) else {
            return false;
        };
        match self.messages.get_mut(mi) {
            Some(msg) => {
                msg.attach_tool_result(ti, output.to_string(), is_error);
                true
            }
            None => false,
        }
    }

    fn push_user(&mut self, record: RawRecord, ts: Option<DateTime<Utc>>) {
        if record.is_meta == Some(true) {
            return;
        }
        let Some(raw) = record.message else {
            return;
        };

        let id = self.message_id(record.uuid);
        let mut msg = Message::new(id, Role::User, self.facts.timestamp_or_last(ts));

        match raw.content {
            Some(RawContent::Text(text)) => msg.push_text(text),
            Some(RawContent::Blocks(blocks)) => {
                for block in blocks {
                    match block {
                        RawBlock::Text { text } => msg.push_text(text),
                        RawBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let output = flatten_text(&content);
                            if !self.attach_result(&tool_use_id, &output, is_error) {
                                msg.push_orphan_result(tool_use_id, output, is_error);
                            }
                        }
                        _ => {}
                    }
                }
            }
            None => {}
        }

        if msg.is_empty() {
            return;
        }
        if self.facts.first_prompt.is_none() && is_user_prompt(&msg.content) {
            self.facts.first_prompt = Some(msg.content.clone());
        }
        self.messages.push(msg);
    }

    fn push_assistant(&mut self, record: RawRecord, ts: Option<DateTime<Utc>>) {
        let Some(raw) = record.message else {
            return;
        };

        if let Some(model) = raw.model.as_deref().filter(|m| is_real_model(m)) {
            self.facts.model = Some(model.to_string());
        }

        let id = self.message_id(record.uuid);
        let mut msg = Message::new(id, Role::Assistant, self.facts.timestamp_or_last(ts));
        msg.model = raw
            .model
            .filter(|m| is_real_model(m))
            .or_else(|| self.facts.model.clone());

        let mut calls = Vec::new();
        match raw.content {
            Some(RawContent::Text(text)) => msg.push_text(text),
            Some(RawContent::Blocks(blocks)) => {
                for block in blocks {
                    match block {
                        RawBlock::Text { text } => msg.push_text(text),
                        RawBlock::Thinking { thinking } if !thinking.is_empty() => {
                            msg.push_thinking(thinking, None)
                        }
                        RawBlock::ToolUse { id, name, input } => {
                            let ti = msg.push_tool_use(id.clone(), name, input.to_string());
                            calls.push((id, ti));
                        }
                        RawBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let output = flatten_text(&content);
                            if !self.attach_result(&tool_use_id, &output, is_error) {
                                msg.push_orphan_result(tool_use_id, output, is_error);
                            }
                        }
                        _ => {}
                    }
                }
            }
            None => {}
        }

        if let Some(raw_usage) = raw.usage {
            let repeated = raw.id.is_some() && raw.id == self.last_response_id;
            if !repeated {
                let usage = TokenUsage::from(raw_usage);
                msg.token_usage = usage;
                self.facts.usage += usage;
            }
        }
        if raw.id.is_some() {
            self.last_response_id = raw.id;
        }

        if msg.is_empty() {
            return;
        }
        let mi = self.messages.len();
        for (call_id, ti) in calls {
            self.tool_index.insert(call_id, (mi, ti));
        }
        self.messages.push(msg);
    }
}

/// Claude writes `<synthetic>` for locally generated replies.
fn is_real_model(model: &str) -> bool {
    !model.is_empty() && !model.starts_with('<')
}

impl RecordParser for ClaudeParser {
    fn begin(&mut self, fallback_id: &str, modified: Option<DateTime<Utc>>) {
        self.fallback_id = fallback_id.to_string();
        self.facts.observe_file_modified(modified);
        self.tool_index = index_tool_uses(&self.messages);
    }

    fn push_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let record: RawRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;

        let ts = record.timestamp.as_deref().and_then(parse_timestamp);
        if let Some(ts) = ts {
            self.facts.observe_timestamp(ts);
        }
        SessionFacts::remember(&mut self.facts.session_id, record.session_id.clone());
        SessionFacts::remember(&mut self.facts.cli_version, record.version.clone());
        SessionFacts::remember(&mut self.facts.slug, record.slug.clone());
        if let Some(branch) = record.git_branch.clone().filter(|b| !b.is_empty()) {
            self.facts.git_branch = Some(branch);
        }
        if self.facts.cwd.is_none() {
            self.facts.cwd = record.cwd.as_deref().filter(|c| !c.is_empty()).map(PathBuf::from);
        }

        if record.is_sidechain == Some(true) {
            return Ok(());
        }

        match record.record_type.as_deref() {
            Some("user") => self.push_user(record, ts),
            Some("assistant") => self.push_assistant(record, ts),
            _ => {}
        }
        Ok(())
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn facts(&self) -> &SessionFacts {
        &self.facts
    }
}

// ============================================
// Adapter
// ============================================

/// Adapter for Claude Code session logs.
pub struct ClaudeCodeAdapter {
    root: PathBuf,
    timestamps: Vec<TimestampSource>,
    archives: ArchiveCache<ClaudeParser>,
    /// session ID -> archive path
    index: RwLock<HashMap<String, PathBuf>>,
}

impl ClaudeCodeAdapter {
    /// Create an adapter reading from `~/.claude`.
    pub fn new() -> Self {
        Self::with_root(crate::config::home_dir().join(".claude"))
    }

    /// Create an adapter with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            timestamps: TimestampConfig::default().fallback,
            archives: ArchiveCache::new(ADAPTER_ID),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Override the `created_at` fallback chain.
    pub fn with_timestamp_fallback(mut self, fallback: Vec<TimestampSource>) -> Self {
        self.timestamps = fallback;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Existing project directories for `project_root`.
    ///
    /// Both the literal and the symlink-resolved path are tried.
    pub fn project_dirs(&self, project_root: &Path) -> Vec<PathBuf> {
        let projects = self.projects_dir();
        let mut dirs = Vec::new();
        for name in project_dir_names(project_root) {
            let dir = projects.join(name);
            if dir.is_dir() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    fn session_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| session_id_from_path(&path).map(|id| (id, path)))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Resolve a session ID to its archive path.
    fn locate(&self, session_id: &str) -> Result<PathBuf> {
        if let Some(path) = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return Ok(path.clone());
        }

        let pattern = self
            .root
            .join("projects")
            .join("*")
            .join(format!("{}.jsonl", glob::Pattern::escape(session_id)));
        let found = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid glob pattern: {}", e)))?
            .flatten()
            .next()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), found.clone());
        Ok(found)
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for ClaudeCodeAdapter {
    fn id(&self) -> &'static str {
        INFO.id
    }

    fn name(&self) -> &'static str {
        INFO.name
    }

    fn icon(&self) -> &'static str {
        INFO.icon
    }

    fn detect(&self, project_root: &Path) -> Result<bool> {
        for dir in self.project_dirs(project_root) {
            if !Self::session_files(&dir)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();

        for dir in self.project_dirs(project_root) {
            for (id, path) in Self::session_files(&dir)? {
                let archive = match self.archives.load(&path, &id, None) {
                    Ok(archive) => archive,
                    Err(Error::NotFound(_)) => continue,
                    Err(e) => {
                        tracing::warn!(
                            adapter = ADAPTER_ID,
                            path = %path.display(),
                            error = %e,
                            "Failed to read session"
                        );
                        continue;
                    }
                };
                sessions.push(INFO.build_session(&id, &path, &archive, &self.timestamps));
                self.index
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, path);
            }
        }

        sort_sessions(&mut sessions);
        tracing::debug!(
            adapter = ADAPTER_ID,
            count = sessions.len(),
            "Listed sessions"
        );
        Ok(sessions)
    }

    fn messages(&self, session_id: &str, offset: usize, limit: usize) -> Result<MessagePage> {
        let path = self.locate(session_id)?;
        let archive = self.archives.load(&path, session_id, None)?;
        if archive.huge {
            return Err(Error::LineTooLong {
                path,
                limit: MAX_LINE_BYTES,
            });
        }
        Ok(MessagePage::window(archive.messages(), offset, limit))
    }

    fn usage(&self, session_id: &str) -> Result<UsageStats> {
        let path = self.locate(session_id)?;
        Ok(self.archives.load(&path, session_id, None)?.usage_stats())
    }

    fn watch(&self, project_root: &Path, config: &WatchConfig) -> Result<Option<WatchHandle>> {
        let dirs = self.project_dirs(project_root);
        if !dirs.is_empty() {
            let target = WatchTarget {
                adapter_id: ADAPTER_ID,
                dirs,
                recursive: false,
                session_id: Arc::new(session_id_from_path),
            };
            return watch_paths(target, config).map(Some);
        }

        // No session yet: watch projects/ so the first one is noticed
        let projects = self.projects_dir();
        if !projects.is_dir() {
            tracing::debug!(adapter = ADAPTER_ID, "No projects directory to watch");
            return Ok(None);
        }
        tracing::debug!(
            adapter = ADAPTER_ID,
            dir = %projects.display(),
            "Project directory missing, watching parent"
        );
        let names = project_dir_names(project_root);
        let target = WatchTarget {
            adapter_id: ADAPTER_ID,
            dirs: vec![projects],
            recursive: true,
            session_id: Arc::new(move |path: &Path| project_session_id(path, &names)),
        };
        watch_paths(target, config).map(Some)
    }

    fn searcher(&self) -> Option<&dyn MessageSearcher> {
        Some(self)
    }
}

impl MessageSearcher for ClaudeCodeAdapter {
    fn search_messages(
        &self,
        session_id: &str,
        matcher: &Matcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageMatch>> {
        let path = self.locate(session_id)?;
        let archive = self.archives.load(&path, session_id, Some(cancel))?;
        matcher.search_messages(archive.messages(), cancel)
    }
}
