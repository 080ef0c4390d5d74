//! Codex adapter
//!
//! Reads session logs from `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`.
//! Codex does not encode the project in the path, so sessions are associated
//! with a project by the `cwd` recorded in their `session_meta` or
//! `turn_context` record.
//!
//! # Record handling
//!
//! | Record | Effect |
//! |--------|--------|
//! | `session_meta` | ID, cwd, CLI version, git branch, start time |
//! | `turn_context` | Sets the model for following assistant messages |
//! | `response_item/message` | User or assistant message (system-injected context dropped) |
//! | `response_item/reasoning` | Thinking, attached to the next assistant message |
//! | `response_item/function_call`, `custom_tool_call` | Tool call on the current assistant message |
//! | `response_item/*_output` | Merged into the matching tool call |
//! | `event_msg/token_count` | Usage delta for the next assistant message, running total |

use super::archive::{
    flatten_text, index_tool_uses, parse_timestamp, AdapterInfo, ArchiveCache, RecordParser,
    SessionFacts,
};
use super::scan::MAX_LINE_BYTES;
use super::{Adapter, MessagePage, MessageSearcher};
use crate::config::{TimestampConfig, TimestampSource, WatchConfig};
use crate::error::{Error, Result};
use crate::search::Matcher;
use crate::types::{
    sort_sessions, Capabilities, Message, MessageMatch, Role, Session, TokenUsage, UsageStats,
};
use crate::watch::{watch_paths, WatchHandle, WatchTarget};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

pub const ADAPTER_ID: &str = "codex";

const INFO: AdapterInfo = AdapterInfo {
    id: ADAPTER_ID,
    name: "Codex",
    icon: "▲",
};

/// Records read from the head of a file when looking for its cwd.
const CWD_PROBE_LINES: usize = 16;

/// Detect system-injected context sent with the user role.
///
/// Codex replays environment details, shell output and instruction files as
/// user messages; none of it was typed by the person.
fn is_system_injected_context(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("<environment_context>")
        || trimmed.starts_with("<user_shell_command>")
        || trimmed.starts_with("<INSTRUCTIONS>")
        || trimmed.starts_with("<user_instructions>")
        || trimmed.starts_with("<system")
        || trimmed.starts_with("# AGENTS.md instructions for")
}

/// Session ID of a rollout file: the trailing UUID of the stem, else the stem.
///
/// `rollout-2025-11-24T19-33-35-019ab86e-1e83-75b0-b2d7-d335492e7026.jsonl`
/// maps to `019ab86e-1e83-75b0-b2d7-d335492e7026`.
pub fn session_id_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() >= 5 {
        let tail = &parts[parts.len() - 5..];
        let widths = [8, 4, 4, 4, 12];
        let is_uuid = tail
            .iter()
            .zip(widths)
            .all(|(part, width)| part.len() == width && part.chars().all(|c| c.is_ascii_hexdigit()));
        if is_uuid {
            return Some(tail.join("-"));
        }
    }
    Some(stem.to_string())
}

/// Whether `cwd` lies inside `project_root` (both already resolved).
fn cwd_within(cwd: &Path, project_root: &Path) -> bool {
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    match cwd.strip_prefix(project_root) {
        Ok(rel) => !rel.components().any(|c| matches!(c, Component::ParentDir)),
        Err(_) => false,
    }
}

fn resolve(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Top-level envelope of a Codex JSONL record.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SessionMetaPayload {
    id: Option<String>,
    timestamp: Option<String>,
    cwd: Option<String>,
    cli_version: Option<String>,
    git: Option<GitInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GitInfo {
    branch: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TurnContextPayload {
    cwd: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventMsgPayload {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TokenInfo {
    total_token_usage: Option<RawUsage>,
    last_token_usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    cached_input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl From<RawUsage> for TokenUsage {
    /// Codex counts cached tokens inside `input_tokens`; split them out.
    fn from(raw: RawUsage) -> Self {
        let cached = raw.cached_input_tokens.unwrap_or(0);
        TokenUsage::new(
            raw.input_tokens.unwrap_or(0).saturating_sub(cached),
            raw.output_tokens.unwrap_or(0),
            cached,
            0,
        )
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseItemPayload {
    #[serde(rename = "type")]
    item_type: Option<String>,
    role: Option<String>,
    content: Option<Vec<RawBlock>>,
    name: Option<String>,
    arguments: Option<String>,
    input: Option<String>,
    call_id: Option<String>,
    output: serde_json::Value,
    summary: Option<Vec<RawSummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawBlock {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

impl RawBlock {
    fn into_text(self) -> Option<String> {
        match self {
            RawBlock::InputText { text } | RawBlock::OutputText { text } | RawBlock::Text { text } => {
                Some(text)
            }
            RawBlock::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawSummary {
    text: Option<String>,
}

/// Output of a function call, unwrapping the `{"output": ...}` envelope Codex writes.
fn tool_output_text(value: &serde_json::Value) -> String {
    if let Some(s) = value.as_str() {
        if let Ok(inner) = serde_json::from_str::<serde_json::Value>(s) {
            if let Some(out) = inner.get("output").and_then(|o| o.as_str()) {
                return out.to_string();
            }
        }
        return s.to_string();
    }
    flatten_text(value)
}

/// Error flag from a function call output's metadata, when present.
fn tool_output_failed(value: &serde_json::Value) -> bool {
    let Some(s) = value.as_str() else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(s)
        .ok()
        .and_then(|inner| inner.pointer("/metadata/exit_code").and_then(|c| c.as_i64()))
        .is_some_and(|code| code != 0)
}

// ============================================
// Parser
// ============================================

/// Incremental parser state for one Codex session.
#[derive(Debug, Clone, Default)]
pub struct CodexParser {
    fallback_id: String,
    messages: Vec<Message>,
    facts: SessionFacts,
    /// call ID -> (message index, tool index); rebuilt every pass
    tool_index: HashMap<String, (usize, usize)>,
    current_model: Option<String>,
    pending_thinking: Vec<String>,
    pending_usage: Option<TokenUsage>,
}

impl CodexParser {
    fn synthesized_id(&self) -> String {
        let session = self.facts.session_id.as_deref().unwrap_or(&self.fallback_id);
        format!("{}#{}", session, self.messages.len())
    }

    /// Start an assistant message carrying pending reasoning and usage.
    fn open_assistant(&mut self, ts: DateTime<Utc>) -> usize {
        let mut msg = Message::new(self.synthesized_id(), Role::Assistant, ts);
        msg.model = self.current_model.clone();
        for text in self.pending_thinking.drain(..) {
            msg.push_thinking(text, None);
        }
        if let Some(usage) = self.pending_usage.take() {
            msg.token_usage = usage;
        }
        self.messages.push(msg);
        self.messages.len() - 1
    }

    /// The assistant message a tool call belongs to.
    ///
    /// Reuses the last message when it is an assistant turn and no new
    /// reasoning arrived since.
    fn current_assistant(&mut self, ts: DateTime<Utc>) -> usize {
        match self.messages.last() {
            Some(last) if last.role == Role::Assistant && self.pending_thinking.is_empty() => {
                self.messages.len() - 1
            }
            _ => self.open_assistant(ts),
        }
    }

    fn handle_session_meta(&mut self, payload: serde_json::Value) {
        let Ok(meta) = serde_json::from_value::<SessionMetaPayload>(payload) else {
            return;
        };
        SessionFacts::remember(&mut self.facts.session_id, meta.id);
        SessionFacts::remember(&mut self.facts.cli_version, meta.cli_version);
        SessionFacts::remember(&mut self.facts.git_branch, meta.git.and_then(|g| g.branch));
        if self.facts.meta_started_at.is_none() {
            self.facts.meta_started_at = meta.timestamp.as_deref().and_then(parse_timestamp);
        }
        if self.facts.cwd.is_none() {
            self.facts.cwd = meta.cwd.filter(|c| !c.is_empty()).map(PathBuf::from);
        }
    }

    fn handle_turn_context(&mut self, payload: serde_json::Value) {
        let Ok(ctx) = serde_json::from_value::<TurnContextPayload>(payload) else {
            return;
        };
        if let Some(model) = ctx.model.filter(|m| !m.is_empty()) {
            self.facts.model = Some(model.clone());
            self.current_model = Some(model);
        }
        if self.facts.cwd.is_none() {
            self.facts.cwd = ctx.cwd.filter(|c| !c.is_empty()).map(PathBuf::from);
        }
    }

    fn handle_event_msg(&mut self, payload: serde_json::Value) {
        let Ok(event) = serde_json::from_value::<EventMsgPayload>(payload) else {
            return;
        };
        if event.msg_type.as_deref() != Some("token_count") {
            return;
        }
        let Some(info) = event.info else {
            return;
        };
        let last = info.last_token_usage.map(TokenUsage::from);
        match info.total_token_usage {
            Some(total) => self.facts.usage = total.into(),
            None => {
                if let Some(last) = last {
                    self.facts.usage += last;
                }
            }
        }
        if let Some(last) = last {
            let pending = self.pending_usage.get_or_insert_with(TokenUsage::default);
            *pending += last;
        }
    }

    fn handle_response_item(&mut self, payload: serde_json::Value, ts: DateTime<Utc>) {
        let Ok(item) = serde_json::from_value::<ResponseItemPayload>(payload) else {
            return;
        };

        match item.item_type.as_deref() {
            Some("message") => self.handle_message(item, ts),
            Some("reasoning") => {
                let text = item
                    .summary
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|s| s.text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !text.is_empty() {
                    self.pending_thinking.push(text);
                }
            }
            Some("function_call") | Some("custom_tool_call") => {
                let call_id = item.call_id.unwrap_or_default();
                let name = item.name.unwrap_or_else(|| "unknown".to_string());
                let input = match (item.arguments, item.input) {
                    (Some(args), _) => args,
                    (None, Some(raw)) => serde_json::json!({ "input": raw }).to_string(),
                    (None, None) => "{}".to_string(),
                };
                let mi = self.current_assistant(ts);
                let ti = self.messages[mi].push_tool_use(call_id.clone(), name, input);
                if !call_id.is_empty() {
                    self.tool_index.insert(call_id, (mi, ti));
                }
            }
            Some("function_call_output") | Some("custom_tool_call_output") => {
                let call_id = item.call_id.unwrap_or_default();
                let output = tool_output_text(&item.output);
                let is_error = tool_output_failed(&item.output);
                match self.tool_index.get(&call_id).copied() {
                    Some((mi, ti)) => self.messages[mi].attach_tool_result(ti, output, is_error),
                    None => {
                        if self.messages.is_empty() {
                            let msg = Message::new(self.synthesized_id(), Role::User, ts);
                            self.messages.push(msg);
                        }
                        if let Some(last) = self.messages.last_mut() {
                            last.push_orphan_result(call_id, output, is_error);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_message(&mut self, item: ResponseItemPayload, ts: DateTime<Utc>) {
        let texts: Vec<String> = item
            .content
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawBlock::into_text)
            .collect();

        match item.role.as_deref() {
            Some("user") => {
                let texts: Vec<String> = texts
                    .into_iter()
                    .filter(|t| !is_system_injected_context(t))
                    .collect();
                if texts.iter().all(|t| t.trim().is_empty()) {
                    return;
                }
                let mut msg = Message::new(self.synthesized_id(), Role::User, ts);
                for text in texts {
                    msg.push_text(text);
                }
                if self.facts.first_prompt.is_none() {
                    self.facts.first_prompt = Some(msg.content.clone());
                }
                self.messages.push(msg);
            }
            Some("assistant") => {
                let mi = self.open_assistant(ts);
                for text in texts {
                    self.messages[mi].push_text(text);
                }
                if self.messages[mi].is_empty() && self.messages[mi].token_usage.is_zero() {
                    self.messages.pop();
                }
            }
            // developer and system prompts
            _ => {}
        }
    }
}

impl RecordParser for CodexParser {
    fn begin(&mut self, fallback_id: &str, modified: Option<DateTime<Utc>>) {
        self.fallback_id = fallback_id.to_string();
        self.facts.observe_file_modified(modified);
        self.tool_index = index_tool_uses(&self.messages);
    }

    fn push_line(&mut self, line: &str) -> std::result::Result<(), String> {
        let event: RawEvent = serde_json::from_str(line).map_err(|e| e.to_string())?;

        let ts = event.timestamp.as_deref().and_then(parse_timestamp);
        if let Some(ts) = ts {
            self.facts.observe_timestamp(ts);
        }
        let ts = self.facts.timestamp_or_last(ts);

        match event.event_type.as_deref() {
            Some("session_meta") => self.handle_session_meta(event.payload),
            Some("turn_context") => self.handle_turn_context(event.payload),
            Some("response_item") => self.handle_response_item(event.payload, ts),
            Some("event_msg") => self.handle_event_msg(event.payload),
            Some(_) => {}
            None => return Err("record has no type".to_string()),
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

/// Read the recorded cwd from the first records of a rollout file.
fn probe_cwd(path: &Path) -> Option<PathBuf> {
    let file = std::fs::File::open(path).ok()?;
    let reader = BufReader::new(file);
    for line in reader.lines().take(CWD_PROBE_LINES) {
        let line = line.ok()?;
        let Ok(event) = serde_json::from_str::<RawEvent>(&line) else {
            continue;
        };
        let cwd = match event.event_type.as_deref() {
            Some("session_meta") => serde_json::from_value::<SessionMetaPayload>(event.payload)
                .ok()
                .and_then(|m| m.cwd),
            Some("turn_context") => serde_json::from_value::<TurnContextPayload>(event.payload)
                .ok()
                .and_then(|c| c.cwd),
            _ => None,
        };
        if let Some(cwd) = cwd.filter(|c| !c.is_empty()) {
            return Some(PathBuf::from(cwd));
        }
    }
    None
}

type CwdIndex = Arc<RwLock<HashMap<PathBuf, Option<PathBuf>>>>;

// ============================================
// Adapter
// ============================================

/// Adapter for Codex rollout logs.
pub struct CodexAdapter {
    root: PathBuf,
    timestamps: Vec<TimestampSource>,
    archives: ArchiveCache<CodexParser>,
    /// session ID -> archive path
    index: RwLock<HashMap<String, PathBuf>>,
    /// archive path -> recorded cwd
    cwds: CwdIndex,
}

impl CodexAdapter {
    /// Create an adapter reading from `~/.codex`.
    pub fn new() -> Self {
        Self::with_root(crate::config::home_dir().join(".codex"))
    }

    /// Create an adapter with a custom root path (for testing).
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            timestamps: TimestampConfig::default().fallback,
            archives: ArchiveCache::new(ADAPTER_ID),
            index: RwLock::new(HashMap::new()),
            cwds: Arc::new(RwLock::new(HashMap::new())),
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

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn all_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sessions_dir().join("**").join("*.jsonl");
        let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid glob pattern: {}", e)))?
            .flatten()
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    fn cwd_of(&self, path: &Path) -> Option<PathBuf> {
        if let Some(cwd) = self
            .cwds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return cwd.clone();
        }
        let cwd = probe_cwd(path);
        // An empty file may not have its header yet; probe again next time
        if cwd.is_some() {
            self.cwds
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.to_path_buf(), cwd.clone());
        }
        cwd
    }

    /// Rollout files whose recorded cwd lies inside `project_root`.
    fn project_files(&self, project_root: &Path) -> Result<Vec<(String, PathBuf)>> {
        let root = resolve(project_root);
        Ok(self
            .all_files()?
            .into_iter()
            .filter(|path| {
                self.cwd_of(path)
                    .is_some_and(|cwd| cwd_within(&cwd, &root))
            })
            .filter_map(|path| session_id_from_path(&path).map(|id| (id, path)))
            .collect())
    }

    fn locate(&self, session_id: &str) -> Result<PathBuf> {
        if let Some(path) = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
        {
            return Ok(path.clone());
        }

        let found = self
            .all_files()?
            .into_iter()
            .find(|path| session_id_from_path(path).as_deref() == Some(session_id))
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), found.clone());
        Ok(found)
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for CodexAdapter {
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
        if !self.sessions_dir().is_dir() {
            return Ok(false);
        }
        Ok(!self.project_files(project_root)?.is_empty())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn sessions(&self, project_root: &Path) -> Result<Vec<Session>> {
        if !self.sessions_dir().is_dir() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for (id, path) in self.project_files(project_root)? {
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
        let dir = self.sessions_dir();
        if !dir.is_dir() {
            tracing::debug!(adapter = ADAPTER_ID, "No sessions directory to watch");
            return Ok(None);
        }

        let cwds = Arc::clone(&self.cwds);
        let root = resolve(project_root);
        let session_id = move |path: &Path| {
            let known = cwds
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned()
                .flatten();
            // Unknown files pass; the refresh filters them by cwd
            match known {
                Some(cwd) if !cwd_within(&cwd, &root) => None,
                _ => session_id_from_path(path),
            }
        };

        let target = WatchTarget {
            adapter_id: ADAPTER_ID,
            dirs: vec![dir],
            recursive: true,
            session_id: Arc::new(session_id),
        };
        watch_paths(target, config).map(Some)
    }

    fn searcher(&self) -> Option<&dyn MessageSearcher> {
        Some(self)
    }
}

impl MessageSearcher for CodexAdapter {
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
