//! Export and clipboard formatters.

use crate::adapter::{claude, codex};
use crate::format::{format_session_duration, format_tokens, short_id};
use crate::summary::SessionSummary;
use crate::types::{Message, Session};
use std::borrow::Borrow;

/// Longest sanitized file name stem, in runes.
pub const FILENAME_MAX_RUNES: usize = 50;

const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Render a session and its messages as Markdown.
///
/// Accepts owned messages or the `Arc`s a pager holds.
pub fn session_to_markdown<M: Borrow<Message>>(session: &Session, messages: &[M]) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# {}", session.name));
    lines.push(String::new());
    lines.push(format!("- **Session:** `{}`", session.id));
    lines.push(format!(
        "- **Adapter:** {} {}",
        session.adapter_icon, session.adapter_name
    ));
    lines.push(format!(
        "- **Started:** {}",
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!(
        "- **Updated:** {}",
        session.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!(
        "- **Duration:** {}",
        format_session_duration(session.duration())
    ));
    if let Some(cwd) = &session.cwd {
        lines.push(format!("- **Directory:** `{}`", cwd.display()));
    }
    if let Some(branch) = &session.git_branch {
        lines.push(format!("- **Branch:** `{}`", branch));
    }
    lines.push(String::new());

    for msg in messages {
        let msg = msg.borrow();
        lines.push(format!(
            "## {} ({})",
            msg.role.display_name(),
            msg.timestamp.format("%H:%M:%S")
        ));
        lines.push(String::new());

        for thinking in &msg.thinking_blocks {
            lines.push("<details>".to_string());
            lines.push("<summary>Thinking</summary>".to_string());
            lines.push(String::new());
            lines.push(thinking.content.clone());
            lines.push(String::new());
            lines.push("</details>".to_string());
            lines.push(String::new());
        }

        if !msg.content.is_empty() {
            lines.push(msg.content.clone());
            lines.push(String::new());
        }

        if !msg.tool_uses.is_empty() {
            lines.push("**Tools:**".to_string());
            for tool in &msg.tool_uses {
                let status = if tool.is_error { " (error)" } else { "" };
                match tool.file_path() {
                    Some(path) => lines.push(format!("- {} `{}`{}", tool.name, path, status)),
                    None => lines.push(format!("- {}{}", tool.name, status)),
                }
            }
            lines.push(String::new());
        }
    }

    let summary = SessionSummary::from_messages(messages.iter().map(|m| m.borrow()));
    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(format!(
        "**Tokens:** {} in / {} out / {} cache read / {} cache write ({} total)",
        format_tokens(summary.tokens.input),
        format_tokens(summary.tokens.output),
        format_tokens(summary.tokens.cache_read),
        format_tokens(summary.tokens.cache_write),
        format_tokens(summary.tokens.total()),
    ));
    lines.push(format!("**Estimated cost:** ${:.2}", summary.est_cost()));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Make `name` safe to use as a file name stem.
///
/// Strips path and shell metacharacters, collapses whitespace runs to a single
/// space and truncates to [`FILENAME_MAX_RUNES`].
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !FORBIDDEN_FILENAME_CHARS.contains(c))
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(FILENAME_MAX_RUNES).collect();
    let trimmed = truncated.trim();
    if trimmed.is_empty() {
        "session".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<sanitized-name>-<short-id>.md`
pub fn export_filename(session: &Session) -> String {
    format!(
        "{}-{}.md",
        sanitize_filename(&session.name),
        short_id(&session.id)
    )
}

/// Shell command that resumes `session_id` in its tool; empty when the tool has none.
pub fn resume_command(adapter_id: &str, session_id: &str) -> String {
    match adapter_id {
        claude::ADAPTER_ID => format!("claude --resume {}", session_id),
        codex::ADAPTER_ID => format!("codex resume {}", session_id),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, TokenUsage};
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    fn session() -> Session {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        Session {
            id: "0c4f7a1e-1111-2222-3333-444455556666".into(),
            adapter_id: "claude-code".into(),
            adapter_name: "Claude Code".into(),
            adapter_icon: "◆".into(),
            name: "Fix: the <flaky> test?".into(),
            slug: None,
            created_at: t,
            updated_at: t + Duration::minutes(12),
            message_count: 2,
            total_tokens: 0,
            file_size: 0,
            path: PathBuf::new(),
            cwd: Some(PathBuf::from("/work/app")),
            git_branch: Some("main".into()),
            cli_version: None,
            model: None,
            is_huge: false,
        }
    }

    #[test]
    fn test_markdown_layout() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 9, 31, 5).unwrap();
        let user = {
            let mut m = Message::new("u1", Role::User, t);
            m.push_text("please fix the test");
            m
        };
        let assistant = {
            let mut m = Message::new("a1", Role::Assistant, t + Duration::seconds(4));
            m.model = Some("claude-sonnet-4-5".into());
            m.push_thinking("look at the test first", None);
            m.push_text("Reading it now.");
            m.push_tool_use("t1", "Read", r#"{"file_path":"/work/app/lib.rs"}"#);
            m.push_tool_use("t2", "Bash", r#"{"command":"ls"}"#);
            m.token_usage = TokenUsage::new(1000, 200, 0, 0);
            m
        };

        let md = session_to_markdown(&session(), &[user, assistant]);
        assert!(md.starts_with("# Fix: the <flaky> test?\n"));
        assert!(md.contains("- **Duration:** 12m"));
        assert!(md.contains("## User (09:31:05)\n\nplease fix the test"));
        assert!(md.contains("## Assistant (09:31:09)"));
        assert!(md.contains("<details>\n<summary>Thinking</summary>\n\nlook at the test first"));
        assert!(md.contains("- Read `/work/app/lib.rs`"));
        assert!(md.contains("- Bash\n"));
        assert!(md.contains("**Tokens:** 1.0k in / 200 out"));
        assert!(md.contains("**Estimated cost:** $0.01"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(sanitize_filename("  many \t\n spaces  "), "many spaces");
        assert_eq!(sanitize_filename(""), "session");
        assert_eq!(sanitize_filename("   \t "), "session");
        assert_eq!(sanitize_filename("///"), "session");

        let long = "é".repeat(80);
        assert_eq!(sanitize_filename(&long).chars().count(), FILENAME_MAX_RUNES);
    }

    #[test]
    fn test_sanitize_filename_never_leaks_forbidden_chars() {
        for input in ["x/../y", "<script>", "C:\\Users\\me", "what?|why*", "\"q\""] {
            let out = sanitize_filename(input);
            assert!(!out.contains(FORBIDDEN_FILENAME_CHARS), "{}", out);
            assert!(out.chars().count() <= FILENAME_MAX_RUNES);
        }
    }

    #[test]
    fn test_export_filename() {
        assert_eq!(export_filename(&session()), "Fix the flaky test-0c4f7a1e.md");
    }

    #[test]
    fn test_resume_command() {
        assert_eq!(resume_command("claude-code", "abc"), "claude --resume abc");
        assert_eq!(resume_command("codex", "abc"), "codex resume abc");
        assert_eq!(resume_command("other", "abc"), "");
    }
}
