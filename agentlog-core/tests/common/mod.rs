//! Fixture helpers shared by the integration tests.

#![allow(dead_code)]

use agentlog_core::adapter::claude::encode_project_path;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A fake home holding assistant archives plus a project directory.
pub struct Fixture {
    pub dir: TempDir,
    pub project: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        agentlog_core::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("work").join("app");
        fs::create_dir_all(&project).unwrap();
        Self { dir, project }
    }

    pub fn claude_root(&self) -> PathBuf {
        self.dir.path().join(".claude")
    }

    pub fn codex_root(&self) -> PathBuf {
        self.dir.path().join(".codex")
    }

    /// Path of a Claude Code archive for this project.
    pub fn claude_session(&self, id: &str) -> PathBuf {
        let dir = self
            .claude_root()
            .join("projects")
            .join(encode_project_path(&self.project));
        fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{}.jsonl", id))
    }

    /// Path of a Codex rollout file under a dated directory.
    pub fn codex_session(&self, uuid: &str) -> PathBuf {
        let dir = self
            .codex_root()
            .join("sessions")
            .join("2025")
            .join("11")
            .join("24");
        fs::create_dir_all(&dir).unwrap();
        dir.join(format!("rollout-2025-11-24T19-33-35-{}.jsonl", uuid))
    }
}

/// Append records, one per line.
pub fn append(path: &Path, records: &[Value]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for record in records {
        writeln!(file, "{}", record).unwrap();
    }
}

pub fn append_raw(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

pub fn claude_user(uuid: &str, ts: &str, text: &str) -> Value {
    json!({
        "type": "user",
        "uuid": uuid,
        "sessionId": "s1",
        "timestamp": ts,
        "cwd": "/work/app",
        "version": "2.0.1",
        "gitBranch": "main",
        "message": { "role": "user", "content": text }
    })
}

pub fn claude_assistant(uuid: &str, ts: &str, response_id: &str, content: Value) -> Value {
    json!({
        "type": "assistant",
        "uuid": uuid,
        "sessionId": "s1",
        "timestamp": ts,
        "message": {
            "role": "assistant",
            "id": response_id,
            "model": "claude-sonnet-4-5",
            "content": content
        }
    })
}

pub fn with_usage(mut record: Value, input: u64, output: u64, cache_read: u64) -> Value {
    record["message"]["usage"] = json!({
        "input_tokens": input,
        "output_tokens": output,
        "cache_read_input_tokens": cache_read,
        "cache_creation_input_tokens": 0
    });
    record
}

pub fn codex_meta(ts: &str, cwd: &Path) -> Value {
    json!({
        "timestamp": ts,
        "type": "session_meta",
        "payload": {
            "id": "019ab86e",
            "timestamp": ts,
            "cwd": cwd,
            "cli_version": "0.63.0",
            "git": { "branch": "main" }
        }
    })
}

pub fn codex_message(ts: &str, role: &str, text: &str) -> Value {
    let kind = if role == "user" { "input_text" } else { "output_text" };
    json!({
        "timestamp": ts,
        "type": "response_item",
        "payload": {
            "type": "message",
            "role": role,
            "content": [{ "type": kind, "text": text }]
        }
    })
}
