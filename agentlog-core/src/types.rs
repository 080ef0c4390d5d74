//! Core domain types for agentlog
//!
//! These types are the canonical model every adapter normalizes into,
//! regardless of which assistant produced the archive.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Adapter** | Parser + watcher for one assistant's on-disk archive format |
//! | **Session** | One conversation archive (one file for the bundled adapters) |
//! | **Message** | One user or assistant utterance within a session |
//! | **Turn** | A maximal run of consecutive messages with the same role |
//! | **Tool use** | A call block; its result is correlated by call ID |
//!
//! All values here are immutable once an adapter hands them out. Consumers
//! share them behind `Arc` rather than mutating them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sessions updated more recently than this are considered active.
pub const ACTIVE_WINDOW_MINUTES: i64 = 5;

// ============================================
// Capabilities
// ============================================

/// A single feature an adapter may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Sessions,
    Messages,
    Usage,
    Watch,
    Search,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Sessions,
        Capability::Messages,
        Capability::Usage,
        Capability::Watch,
        Capability::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Sessions => "sessions",
            Capability::Messages => "messages",
            Capability::Usage => "usage",
            Capability::Watch => "watch",
            Capability::Search => "search",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Sessions => 1,
            Capability::Messages => 1 << 1,
            Capability::Usage => 1 << 2,
            Capability::Watch => 1 << 3,
            Capability::Search => 1 << 4,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The subset of [`Capability`] values an adapter supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.0 |= cap.bit();
        self
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::empty(), |caps, c| caps.with(c))
    }
}

// ============================================
// Token usage
// ============================================

/// Token counters for one message or an accumulated total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// USD per million tokens: (input, output, cache read, cache write).
struct Pricing(f64, f64, f64, f64);

const OPUS: Pricing = Pricing(15.0, 75.0, 1.5, 18.75);
const SONNET: Pricing = Pricing(3.0, 15.0, 0.3, 3.75);
const HAIKU: Pricing = Pricing(0.8, 4.0, 0.08, 1.0);
const GPT5: Pricing = Pricing(1.25, 10.0, 0.125, 0.0);

fn pricing_for(model: Option<&str>) -> &'static Pricing {
    let Some(model) = model else {
        return &SONNET;
    };
    let model = model.to_ascii_lowercase();
    if model.contains("opus") {
        &OPUS
    } else if model.contains("haiku") {
        &HAIKU
    } else if model.starts_with("gpt-5") || model.contains("codex") {
        &GPT5
    } else {
        // sonnet-class rates for sonnet and anything unknown
        &SONNET
    }
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_read: u64, cache_write: u64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_write,
        }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }

    /// Estimated cost in USD for these counters billed against `model`.
    pub fn est_cost(&self, model: Option<&str>) -> f64 {
        let p = pricing_for(model);
        (self.input as f64 * p.0
            + self.output as f64 * p.1
            + self.cache_read as f64 * p.2
            + self.cache_write as f64 * p.3)
            / 1_000_000.0
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.add(&rhs);
    }
}

/// Aggregated usage for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub totals: TokenUsage,
    pub message_count: usize,
    /// Most recently seen model, if any
    pub model: Option<String>,
}

impl UsageStats {
    pub fn est_cost(&self) -> f64 {
        self.totals.est_cost(self.model.as_deref())
    }
}

// ============================================
// Content
// ============================================

/// Message author, after filtering everything that is not a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One ordered piece of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        token_count: u64,
    },
    ToolUse {
        id: String,
        name: String,
        /// JSON-encoded tool input
        input: String,
    },
    ToolResult {
        tool_use_id: String,
        output: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn kind(&self) -> BlockKind {
        match self {
            ContentBlock::Text { .. } => BlockKind::Text,
            ContentBlock::Thinking { .. } => BlockKind::Thinking,
            ContentBlock::ToolUse { .. } => BlockKind::ToolUse,
            ContentBlock::ToolResult { .. } => BlockKind::ToolResult,
        }
    }

    /// Searchable text of this block.
    pub fn searchable_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } | ContentBlock::Thinking { text, .. } => text,
            ContentBlock::ToolUse { input, .. } => input,
            ContentBlock::ToolResult { output, .. } => output,
        }
    }
}

/// Discriminator of [`ContentBlock`], used in search hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Thinking => "thinking",
            BlockKind::ToolUse => "tool_use",
            BlockKind::ToolResult => "tool_result",
        }
    }
}

/// A tool call together with its (possibly still missing) result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    /// JSON-encoded input
    pub input: String,
    pub output: Option<String>,
    pub is_error: bool,
}

impl ToolUse {
    /// `file_path` (or `path`) argument of the call, when the input carries one.
    pub fn file_path(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.input).ok()?;
        ["file_path", "path", "notebook_path"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Opaque reasoning text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub content: String,
    pub token_count: u64,
}

impl ThinkingBlock {
    /// Use the source-provided count, else estimate four bytes per token.
    pub fn new(content: String, token_count: Option<u64>) -> Self {
        let token_count = token_count.unwrap_or(content.len() as u64 / 4);
        Self {
            content,
            token_count,
        }
    }
}

// ============================================
// Messages
// ============================================

/// One utterance in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Source ID, or `"<session-id>#<n>"` when the source has none
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    /// Model, inherited from the surrounding turn context when not on the record
    pub model: Option<String>,
    pub content_blocks: Vec<ContentBlock>,
    /// Text blocks joined with `\n`
    pub content: String,
    pub tool_uses: Vec<ToolUse>,
    pub thinking_blocks: Vec<ThinkingBlock>,
    pub token_usage: TokenUsage,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role,
            timestamp,
            model: None,
            content_blocks: Vec::new(),
            content: String::new(),
            tool_uses: Vec::new(),
            thinking_blocks: Vec::new(),
            token_usage: TokenUsage::default(),
        }
    }

    /// Append a text block and keep `content` in sync.
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if !self.content.is_empty() {
            self.content.push('\n');
        }
        self.content.push_str(&text);
        self.content_blocks.push(ContentBlock::Text { text });
    }

    pub fn push_thinking(&mut self, text: impl Into<String>, token_count: Option<u64>) {
        let block = ThinkingBlock::new(text.into(), token_count);
        self.content_blocks.push(ContentBlock::Thinking {
            text: block.content.clone(),
            token_count: block.token_count,
        });
        self.thinking_blocks.push(block);
    }

    /// Append a tool call; returns its index in `tool_uses`.
    pub fn push_tool_use(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> usize {
        let (id, name, input) = (id.into(), name.into(), input.into());
        self.content_blocks.push(ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        });
        self.tool_uses.push(ToolUse {
            id,
            name,
            input,
            output: None,
            is_error: false,
        });
        self.tool_uses.len() - 1
    }

    /// Attach a result to the tool call at `index` and record it as a block.
    pub fn attach_tool_result(&mut self, index: usize, output: String, is_error: bool) {
        let Some(tool) = self.tool_uses.get_mut(index) else {
            return;
        };
        tool.output = Some(output.clone());
        tool.is_error = is_error;
        let tool_use_id = tool.id.clone();
        self.content_blocks.push(ContentBlock::ToolResult {
            tool_use_id,
            output,
            is_error,
        });
    }

    /// Record a result whose call was never seen.
    pub fn push_orphan_result(&mut self, tool_use_id: String, output: String, is_error: bool) {
        self.content_blocks.push(ContentBlock::ToolResult {
            tool_use_id,
            output,
            is_error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.content_blocks.is_empty()
    }

    /// File paths referenced by this message's tool calls, in call order.
    pub fn file_paths(&self) -> Vec<String> {
        self.tool_uses.iter().filter_map(ToolUse::file_path).collect()
    }

    /// Estimated thinking tokens across all reasoning blocks.
    pub fn thinking_tokens(&self) -> u64 {
        self.thinking_blocks.iter().map(|t| t.token_count).sum()
    }
}

// ============================================
// Sessions
// ============================================

/// One conversation archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Adapter-chosen identifier, unique within the adapter
    pub id: String,
    pub adapter_id: String,
    pub adapter_name: String,
    pub adapter_icon: String,
    /// Derived display name
    pub name: String,
    pub slug: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub total_tokens: u64,
    /// Size of the archive file in bytes
    pub file_size: u64,
    pub path: PathBuf,
    /// Working directory the session ran in
    pub cwd: Option<PathBuf>,
    pub git_branch: Option<String>,
    /// Version of the tool that wrote the archive
    pub cli_version: Option<String>,
    pub model: Option<String>,
    /// Set when a line exceeded the scanner limit; the session is only partially known
    pub is_huge: bool,
}

impl Session {
    pub fn duration(&self) -> Duration {
        self.updated_at - self.created_at
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at < Duration::minutes(ACTIVE_WINDOW_MINUTES)
    }

    /// Globally unique key: `(adapter_id, id)`.
    pub fn key(&self) -> (&str, &str) {
        (&self.adapter_id, &self.id)
    }
}

/// Sort newest-updated first; ties by adapter then session ID.
pub fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.adapter_id.cmp(&b.adapter_id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================
// Search results
// ============================================

/// One hit inside one line of one content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMatch {
    pub block: BlockKind,
    /// 1-based line number within the block
    pub line_number: usize,
    pub line: String,
    /// Rune column where the hit starts (inclusive)
    pub col_start: usize,
    /// Rune column where the hit ends (exclusive)
    pub col_end: usize,
}

/// Hits grouped by message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMatch {
    pub message_id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub matches: Vec<ContentMatch>,
}

/// Hits grouped by session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSearchResult {
    pub session: Session,
    pub messages: Vec<MessageMatch>,
    pub collapsed: bool,
}

impl SessionSearchResult {
    pub fn match_count(&self) -> usize {
        self.messages.iter().map(|m| m.matches.len()).sum()
    }

    /// Rows this result occupies when flattened for display.
    pub fn flat_len(&self) -> usize {
        if self.collapsed {
            1
        } else {
            1 + self
                .messages
                .iter()
                .map(|m| 1 + m.matches.len())
                .sum::<usize>()
        }
    }
}

// ============================================
// Change events
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    SessionUpdated,
    MessageAdded,
    SessionDeleted,
}

/// A change notification produced by an adapter watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub adapter_id: String,
    /// Empty means "refresh everything"
    pub session_id: String,
    /// Current size of the session file, when known
    pub file_size: Option<u64>,
}

impl Event {
    pub fn refresh_all(adapter_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::SessionUpdated,
            adapter_id: adapter_id.into(),
            session_id: String::new(),
            file_size: None,
        }
    }
}
