//! Query compilation and per-message matching.

use super::SearchOptions;
use crate::error::{Error, Result};
use crate::types::{BlockKind, ContentMatch, Message, MessageMatch};
use regex::{Regex, RegexBuilder};
use tokio_util::sync::CancellationToken;

/// A compiled search query.
///
/// Substring queries are escaped and compiled like regexes so both modes
/// share one matching path.
#[derive(Debug, Clone)]
pub struct Matcher {
    query: String,
    regex: Regex,
}

impl Matcher {
    pub fn new(query: &str, options: &SearchOptions) -> Result<Self> {
        let pattern = if options.use_regex {
            query.to_string()
        } else {
            regex::escape(query)
        };
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!options.case_sensitive)
            .build()
            .map_err(|e| Error::InvalidQuery(e.to_string()))?;
        Ok(Self {
            query: query.to_string(),
            regex,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Every hit in `text`, line by line, with rune columns.
    pub fn find_in_text(&self, block: BlockKind, text: &str) -> Vec<ContentMatch> {
        let mut hits = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            for m in self.regex.find_iter(line) {
                if m.start() == m.end() {
                    continue;
                }
                let col_start = line[..m.start()].chars().count();
                let col_end = col_start + m.as_str().chars().count();
                hits.push(ContentMatch {
                    block,
                    line_number: idx + 1,
                    line: line.to_string(),
                    col_start,
                    col_end,
                });
            }
        }
        hits
    }

    /// Hits across every content block of `message`.
    pub fn find_in_message(&self, message: &Message) -> Vec<ContentMatch> {
        message
            .content_blocks
            .iter()
            .flat_map(|block| self.find_in_text(block.kind(), block.searchable_text()))
            .collect()
    }

    /// Search `messages` in order, polling `cancel` between messages.
    pub fn search_messages(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageMatch>> {
        let mut out = Vec::new();
        for message in messages {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let matches = self.find_in_message(message);
            if !matches.is_empty() {
                out.push(MessageMatch {
                    message_id: message.id.clone(),
                    role: message.role,
                    timestamp: message.timestamp,
                    matches,
                });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use chrono::Utc;

    fn substring() -> SearchOptions {
        SearchOptions::default()
    }

    #[test]
    fn test_substring_is_escaped_and_case_insensitive() {
        let matcher = Matcher::new("a.b", &substring()).unwrap();
        assert!(matcher.find_in_text(BlockKind::Text, "axb").is_empty());
        let hits = matcher.find_in_text(BlockKind::Text, "see A.B here");
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].col_start, hits[0].col_end), (4, 7));
    }

    #[test]
    fn test_case_sensitive() {
        let options = SearchOptions {
            case_sensitive: true,
            ..SearchOptions::default()
        };
        let matcher = Matcher::new("Test", &options).unwrap();
        assert_eq!(matcher.find_in_text(BlockKind::Text, "test Test").len(), 1);
    }

    #[test]
    fn test_regex_mode_and_invalid_pattern() {
        let options = SearchOptions {
            use_regex: true,
            ..SearchOptions::default()
        };
        let matcher = Matcher::new(r"fn \w+", &options).unwrap();
        let hits = matcher.find_in_text(BlockKind::ToolUse, "pub fn main() {}");
        assert_eq!(hits[0].col_start, 4);
        assert_eq!(hits[0].col_end, 11);

        let err = Matcher::new("(unclosed", &options).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn test_rune_columns_and_line_numbers() {
        let matcher = Matcher::new("wörld", &substring()).unwrap();
        let hits = matcher.find_in_text(BlockKind::Text, "first\nhéllo wörld");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line_number, 2);
        assert_eq!(hits[0].line, "héllo wörld");
        assert_eq!((hits[0].col_start, hits[0].col_end), (6, 11));
    }

    #[test]
    fn test_case_folding_covers_non_ascii() {
        let matcher = Matcher::new("WÖRLD", &substring()).unwrap();
        let hits = matcher.find_in_text(BlockKind::Text, "héllo wörld");
        assert_eq!(hits.len(), 1);
        assert_eq!((hits[0].col_start, hits[0].col_end), (6, 11));

        let matcher = Matcher::new("ПРИВЕТ", &substring()).unwrap();
        assert_eq!(matcher.find_in_text(BlockKind::Text, "привет, мир").len(), 1);

        let options = SearchOptions {
            case_sensitive: true,
            ..SearchOptions::default()
        };
        let matcher = Matcher::new("WÖRLD", &options).unwrap();
        assert!(matcher.find_in_text(BlockKind::Text, "héllo wörld").is_empty());
    }

    #[test]
    fn test_search_messages_covers_all_blocks() {
        let mut msg = Message::new("m1", Role::Assistant, Utc::now());
        msg.push_thinking("need to test this", None);
        msg.push_text("running the test suite");
        let idx = msg.push_tool_use("t1", "Bash", r#"{"command":"cargo test"}"#);
        msg.attach_tool_result(idx, "test result: ok".to_string(), false);
        let other = Message::new("m2", Role::User, Utc::now());

        let matcher = Matcher::new("test", &substring()).unwrap();
        let found = matcher
            .search_messages(&[msg, other], &CancellationToken::new())
            .unwrap();
        assert_eq!(found.len(), 1);
        let kinds: Vec<_> = found[0].matches.iter().map(|m| m.block).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Thinking,
                BlockKind::Text,
                BlockKind::ToolUse,
                BlockKind::ToolResult
            ]
        );
    }

    #[test]
    fn test_search_messages_honors_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let matcher = Matcher::new("x", &substring()).unwrap();
        let msgs = vec![Message::new("m", Role::User, Utc::now())];
        assert!(matches!(
            matcher.search_messages(&msgs, &token),
            Err(Error::Cancelled)
        ));
    }
}
