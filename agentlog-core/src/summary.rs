//! Derived views over a session's messages: turns and a running summary.
//!
//! Both are built incrementally so that appending messages to a live
//! session never requires recomputing from scratch.

use crate::types::{Message, Role, TokenUsage};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A maximal run of consecutive messages with the same role.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub messages: Vec<Arc<Message>>,
}

impl Turn {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn token_usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for msg in &self.messages {
            usage += msg.token_usage;
        }
        usage
    }
}

/// Group `messages` into turns.
pub fn group_turns(messages: &[Arc<Message>]) -> Vec<Turn> {
    let mut turns = Vec::new();
    extend_turns(&mut turns, messages);
    turns
}

/// Append `tail` to existing turns, continuing the last turn when roles match.
pub fn extend_turns(turns: &mut Vec<Turn>, tail: &[Arc<Message>]) {
    for msg in tail {
        match turns.last_mut() {
            Some(turn) if turn.role == msg.role => turn.messages.push(Arc::clone(msg)),
            _ => turns.push(Turn {
                role: msg.role,
                messages: vec![Arc::clone(msg)],
            }),
        }
    }
}

/// Aggregates shown alongside a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tokens: TokenUsage,
    pub thinking_tokens: u64,
    pub tool_calls: usize,
    /// Calls per tool name
    pub tool_counts: BTreeMap<String, usize>,
    /// Files touched by tool calls, first-seen order
    pub files: Vec<String>,
    /// Models seen, first-seen order
    pub models: Vec<String>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut summary = Self::default();
        for msg in messages {
            summary.add(msg);
        }
        summary
    }

    /// Fold one more message into the summary.
    pub fn add(&mut self, msg: &Message) {
        self.message_count += 1;
        match msg.role {
            Role::User => self.user_messages += 1,
            Role::Assistant => self.assistant_messages += 1,
        }
        self.tokens += msg.token_usage;
        self.thinking_tokens += msg.thinking_tokens();

        for tool in &msg.tool_uses {
            self.tool_calls += 1;
            *self.tool_counts.entry(tool.name.clone()).or_default() += 1;
        }
        for path in msg.file_paths() {
            if !self.files.contains(&path) {
                self.files.push(path);
            }
        }
        if let Some(model) = &msg.model {
            if !self.models.contains(model) {
                self.models.push(model.clone());
            }
        }

        self.first_at = Some(self.first_at.map_or(msg.timestamp, |t| t.min(msg.timestamp)));
        self.last_at = Some(self.last_at.map_or(msg.timestamp, |t| t.max(msg.timestamp)));
    }

    /// Cost estimate billed against the most recent model.
    pub fn est_cost(&self) -> f64 {
        self.tokens.est_cost(self.models.last().map(String::as_str))
    }
}
