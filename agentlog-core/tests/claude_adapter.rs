//! Claude Code adapter against archives on disk.

mod common;

use agentlog_core::adapter::ClaudeCodeAdapter;
use agentlog_core::config::WatchConfig;
use agentlog_core::{Adapter, Role, TokenUsage};
use common::*;
use serde_json::json;
use std::time::Duration;

fn scenario_lines() -> Vec<serde_json::Value> {
    vec![
        claude_user("u1", "2025-11-24T10:00:00Z", "explain the parser"),
        with_usage(
            claude_assistant(
                "a1",
                "2025-11-24T10:00:05Z",
                "msg_1",
                json!([{ "type": "text", "text": "It reads one line at a time." }]),
            ),
            50,
            20,
            10,
        ),
        claude_user("u2", "2025-11-24T10:01:00Z", "show me the file"),
        claude_assistant(
            "a2",
            "2025-11-24T10:01:04Z",
            "msg_2",
            json!([{
                "type": "tool_use",
                "id": "t1",
                "name": "Read",
                "input": { "file_path": "/tmp/x" }
            }]),
        ),
    ]
}

#[test]
fn test_parses_four_message_session() {
    let fx = Fixture::new();
    let path = fx.claude_session("abc");
    append(&path, &scenario_lines());

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert!(adapter.detect(&fx.project).unwrap());

    let sessions = adapter.sessions(&fx.project).unwrap();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.id, "abc");
    assert_eq!(session.adapter_id, "claude-code");
    assert_eq!(session.message_count, 4);
    assert_eq!(session.name, "explain the parser");
    assert_eq!(session.git_branch.as_deref(), Some("main"));

    let page = adapter.messages("abc", 0, 100).unwrap();
    assert_eq!(page.total, 4);
    let msgs = &page.messages;
    assert_eq!(msgs[0].role, Role::User);
    assert_eq!(msgs[0].content, "explain the parser");
    assert_eq!(msgs[1].token_usage, TokenUsage::new(50, 20, 10, 0));
    assert_eq!(msgs[1].model.as_deref(), Some("claude-sonnet-4-5"));
    assert_eq!(msgs[3].tool_uses.len(), 1);
    assert_eq!(msgs[3].tool_uses[0].id, "t1");
    assert_eq!(msgs[3].tool_uses[0].name, "Read");
    assert_eq!(msgs[3].file_paths(), vec!["/tmp/x".to_string()]);
}

#[test]
fn test_malformed_line_is_skipped() {
    let fx = Fixture::new();
    let path = fx.claude_session("bad");
    append(&path, &[claude_user("u1", "2025-11-24T10:00:00Z", "first")]);
    append_raw(&path, "{\"type\": \"user\", \"message\": \n");
    append(&path, &[claude_user("u2", "2025-11-24T10:00:10Z", "second")]);

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    let sessions = adapter.sessions(&fx.project).unwrap();
    assert_eq!(sessions[0].message_count, 2);

    let page = adapter.messages("bad", 0, 10).unwrap();
    let texts: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[test]
fn test_reparse_is_deterministic() {
    let fx = Fixture::new();
    let path = fx.claude_session("det");
    append(&path, &scenario_lines());

    let a = ClaudeCodeAdapter::with_root(fx.claude_root());
    let b = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert_eq!(
        a.messages("det", 0, 100).unwrap().messages,
        b.messages("det", 0, 100).unwrap().messages
    );
    assert_eq!(a.sessions(&fx.project).unwrap(), b.sessions(&fx.project).unwrap());
}

#[test]
fn test_append_extends_previous_parse() {
    let fx = Fixture::new();
    let path = fx.claude_session("grow");
    let lines = scenario_lines();
    append(&path, &lines[..2]);

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    let before = adapter.messages("grow", 0, 100).unwrap().messages;
    assert_eq!(before.len(), 2);

    append(&path, &lines[2..]);
    let after = adapter.messages("grow", 0, 100).unwrap().messages;
    assert_eq!(after.len(), 4);
    assert_eq!(&after[..2], &before[..]);

    // A fresh parse of the whole file agrees with the resumed one.
    let fresh = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert_eq!(fresh.messages("grow", 0, 100).unwrap().messages, after);
}

#[test]
fn test_partial_trailing_line_waits_for_newline() {
    let fx = Fixture::new();
    let path = fx.claude_session("tail");
    append(&path, &[claude_user("u1", "2025-11-24T10:00:00Z", "hello")]);

    let second = claude_user("u2", "2025-11-24T10:00:30Z", "still typing").to_string();
    let (head, rest) = second.split_at(second.len() / 2);
    append_raw(&path, head);

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert_eq!(adapter.messages("tail", 0, 10).unwrap().total, 1);

    append_raw(&path, rest);
    append_raw(&path, "\n");
    let page = adapter.messages("tail", 0, 10).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.messages[1].content, "still typing");
}

#[test]
fn test_tool_result_is_merged_into_call() {
    let fx = Fixture::new();
    let path = fx.claude_session("tools");
    let mut lines = scenario_lines();
    lines.push(json!({
        "type": "user",
        "uuid": "u3",
        "timestamp": "2025-11-24T10:01:05Z",
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": "fn main() {}"
            }]
        }
    }));
    append(&path, &lines);

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    let page = adapter.messages("tools", 0, 100).unwrap();
    assert_eq!(page.total, 4);
    let tool = &page.messages[3].tool_uses[0];
    assert_eq!(tool.output.as_deref(), Some("fn main() {}"));
    assert!(!tool.is_error);
}

#[test]
fn test_sessions_and_pages() {
    let fx = Fixture::new();
    append(
        &fx.claude_session("older"),
        &[claude_user("u1", "2025-11-20T09:00:00Z", "old work")],
    );
    append(
        &fx.claude_session("newer"),
        &[claude_user("u1", "2025-11-24T09:00:00Z", "new work")],
    );

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    let mut sessions = adapter.sessions(&fx.project).unwrap();
    agentlog_core::sort_sessions(&mut sessions);
    let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);

    let missing = adapter.messages("nope", 0, 10).unwrap_err();
    assert!(matches!(missing, agentlog_core::Error::SessionNotFound(_)));
}

#[test]
fn test_other_project_is_not_detected() {
    let fx = Fixture::new();
    append(
        &fx.claude_session("abc"),
        &[claude_user("u1", "2025-11-24T10:00:00Z", "hi")],
    );
    let elsewhere = fx.dir.path().join("work").join("other");
    std::fs::create_dir_all(&elsewhere).unwrap();

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert!(!adapter.detect(&elsewhere).unwrap());
    assert!(adapter.sessions(&elsewhere).unwrap().is_empty());
}

#[test]
fn test_usage_sums_messages() {
    let fx = Fixture::new();
    append(&fx.claude_session("use"), &scenario_lines());

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    let stats = adapter.usage("use").unwrap();
    assert_eq!(stats.totals, TokenUsage::new(50, 20, 10, 0));
    assert_eq!(stats.message_count, 4);
}

#[tokio::test]
async fn test_watch_notices_first_session_of_project() {
    let fx = Fixture::new();
    // Another project exists, this one has no directory yet
    std::fs::create_dir_all(fx.claude_root().join("projects").join("-elsewhere")).unwrap();

    let adapter = ClaudeCodeAdapter::with_root(fx.claude_root());
    assert!(adapter.project_dirs(&fx.project).is_empty());
    let mut handle = adapter
        .watch(&fx.project, &WatchConfig::default())
        .unwrap()
        .expect("projects directory is watched");

    std::fs::write(
        fx.claude_root().join("projects").join("-elsewhere").join("other.jsonl"),
        "{}\n",
    )
    .unwrap();
    let path = fx.claude_session("first");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut event = None;
    for _ in 0..10 {
        append(&path, &[claude_user("u1", "2025-11-24T10:00:00Z", "hello")]);
        if let Ok(received) = tokio::time::timeout(Duration::from_millis(500), handle.recv()).await {
            event = received;
            break;
        }
    }
    let event = event.expect("no watch event for the new session");
    assert_eq!(event.session_id, "first");
    assert_eq!(event.adapter_id, "claude-code");

    handle.close();
}
