//! agentlog - browse and search AI coding assistant session archives
//!
//! Headless front end over `agentlog-core`: lists sessions for a project,
//! pages through messages, runs content search, exports Markdown and follows
//! live changes.

mod runtime;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentlog_core::adapter::create_all_adapters;
use agentlog_core::cache::WorktreeCache;
use agentlog_core::export::{export_filename, resume_command, session_to_markdown};
use agentlog_core::format::{
    format_relative_time, format_session_duration, format_tokens, short_id, truncate_runes,
};
use agentlog_core::config::UiState;
use agentlog_core::{
    sort_sessions, AdapterRef, Config, ContentSearchEngine, MessagePager, SearchOptions, Session,
    SessionLoader,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "agentlog")]
#[command(about = "Browse and search AI coding assistant session archives")]
#[command(version)]
struct Args {
    /// Project directory (default: current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions, newest first
    Sessions {
        /// Include sessions from the repository's other git worktrees
        #[arg(long)]
        worktrees: bool,
    },
    /// Show a page of messages grouped into turns
    Messages {
        /// Session ID or unique prefix
        id: String,
        /// Move this many half pages towards older messages
        #[arg(long, default_value_t = 0)]
        older: usize,
    },
    /// Search message content across all sessions
    Search {
        query: String,
        #[arg(long)]
        case_sensitive: bool,
        /// Treat the query as a regular expression
        #[arg(long)]
        regex: bool,
        /// Maximum matches to show
        #[arg(long)]
        max: Option<usize>,
    },
    /// Export a session as Markdown
    Export {
        id: String,
        /// Output directory (default: print to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the command that resumes a session
    Resume { id: String },
    /// Follow session changes until interrupted
    Watch {
        /// Keep a content search for this query up to date
        #[arg(long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = match agentlog_core::logging::init(&config.logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!(
                "warning: logging to {} disabled: {}",
                agentlog_core::logging::log_file_path().display(),
                e
            );
            None
        }
    };

    let project_root = match &args.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    tracing::info!(project = %project_root.display(), command = ?args.command, "agentlog starting");

    let loader = Arc::new(SessionLoader::new(
        create_all_adapters(&config),
        project_root.clone(),
    ));

    match args.command {
        Command::Sessions { worktrees } => cmd_sessions(&loader, worktrees, args.json).await,
        Command::Messages { id, older } => {
            cmd_messages(&loader, &config, &id, older, args.json).await
        }
        Command::Search {
            query,
            case_sensitive,
            regex,
            max,
        } => {
            let options = SearchOptions {
                case_sensitive,
                use_regex: regex,
                max_results: max,
            };
            cmd_search(&loader, &config, &query, options, args.json).await
        }
        Command::Export { id, out } => cmd_export(&loader, &id, out.as_deref()).await,
        Command::Resume { id } => {
            let session = find_session(&loader, &id).await?;
            let cmd = resume_command(&session.adapter_id, &session.id);
            if cmd.is_empty() {
                bail!("{} has no resume command", session.adapter_name);
            }
            println!("{}", cmd);
            Ok(())
        }
        Command::Watch { search } => runtime::run(loader, &config, search).await,
    }
}

async fn load_sessions(loader: &SessionLoader) -> Vec<Session> {
    loader.load().await.unwrap_or_default()
}

/// Resolve an exact session ID or a unique prefix of one.
async fn find_session(loader: &SessionLoader, id: &str) -> Result<Session> {
    let sessions = load_sessions(loader).await;
    if let Some(exact) = sessions.iter().find(|s| s.id == id) {
        return Ok(exact.clone());
    }
    let mut matches = sessions.into_iter().filter(|s| s.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(session), None) => Ok(session),
        (Some(_), Some(_)) => bail!("session prefix {:?} is ambiguous", id),
        (None, _) => bail!("no session matching {:?} in this project", id),
    }
}

fn adapter_for(loader: &SessionLoader, session: &Session) -> Result<AdapterRef> {
    loader
        .adapter(&session.adapter_id)
        .cloned()
        .with_context(|| format!("unknown adapter {}", session.adapter_id))
}

async fn cmd_sessions(loader: &SessionLoader, worktrees: bool, json: bool) -> Result<()> {
    let mut sessions = load_sessions(loader).await;
    if worktrees {
        let cache = WorktreeCache::new();
        for path in cache.paths(loader.project_root()) {
            if path == loader.project_root() {
                continue;
            }
            tracing::debug!(worktree = %path.display(), "Loading worktree sessions");
            let other = SessionLoader::new(loader.adapters().to_vec(), path);
            sessions.extend(load_sessions(&other).await);
        }
        sort_sessions(&mut sessions);
        sessions.dedup_by(|a, b| a.key() == b.key());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions found for {}", loader.project_root().display());
        return Ok(());
    }
    // The saved sidebar width sizes the name column
    let name_width = UiState::load()
        .sidebar_width
        .map_or(50, usize::from)
        .clamp(20, 80);
    for s in &sessions {
        let active = if s.is_active() { "●" } else { " " };
        let huge = if s.is_huge { " (partial)" } else { "" };
        println!(
            "{} {} {}  {:<width$} {:>8} {:>5} msgs {:>7} tok  {}{}",
            active,
            s.adapter_icon,
            short_id(&s.id),
            truncate_runes(&s.name, name_width),
            format_relative_time(s.updated_at),
            s.message_count,
            format_tokens(s.total_tokens),
            format_session_duration(s.duration()),
            huge,
            width = name_width + 2
        );
    }
    Ok(())
}

async fn cmd_messages(
    loader: &SessionLoader,
    config: &Config,
    id: &str,
    older: usize,
    json: bool,
) -> Result<()> {
    let session = find_session(loader, id).await?;
    let adapter = adapter_for(loader, &session)?;
    let mut pager = MessagePager::new(adapter, session.id.clone(), config.pager.page_size);
    pager.load().await.context("failed to load messages")?;
    for _ in 0..older {
        pager.older().await.context("failed to load older messages")?;
    }

    if json {
        let messages: Vec<_> = pager.messages().iter().map(|m| &**m).collect();
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    println!("{} {}  ({})", session.adapter_icon, session.name, session.id);
    if pager.messages().is_empty() {
        println!("no messages");
        return Ok(());
    }
    let end = pager.total().saturating_sub(pager.offset());
    let start = end.saturating_sub(pager.messages().len()) + 1;
    println!(
        "messages {}-{} of {}{}",
        start,
        end,
        pager.total(),
        if pager.has_older() { "  (older available)" } else { "" }
    );
    println!();

    for turn in pager.turns() {
        let started = turn
            .started_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("── {} ({}) ──", turn.role.display_name(), started);
        for msg in &turn.messages {
            for thinking in &msg.thinking_blocks {
                let first = thinking.content.lines().next().unwrap_or("");
                println!("  [thinking] {}", truncate_runes(first, 100));
            }
            for line in msg.content.lines() {
                println!("  {}", line);
            }
            for tool in &msg.tool_uses {
                let target = tool.file_path().unwrap_or_default();
                let status = match (&tool.output, tool.is_error) {
                    (_, true) => "error",
                    (Some(_), false) => "ok",
                    (None, false) => "pending",
                };
                println!("  → {} {} [{}]", tool.name, target, status);
            }
        }
        println!();
    }

    let summary = pager.summary();
    println!(
        "tokens: {} in / {} out / {} cached   tools: {}   files: {}   est. ${:.2}",
        format_tokens(summary.tokens.input),
        format_tokens(summary.tokens.output),
        format_tokens(summary.tokens.cache_read),
        summary.tool_calls,
        summary.files.len(),
        summary.est_cost()
    );
    Ok(())
}

async fn cmd_search(
    loader: &SessionLoader,
    config: &Config,
    query: &str,
    options: SearchOptions,
    json: bool,
) -> Result<()> {
    let sessions = load_sessions(loader).await;
    let engine = ContentSearchEngine::new(config.search.clone());
    let cancel = CancellationToken::new();

    let adapter_map = loader.adapter_map();
    let search = engine.search(query, &sessions, &adapter_map, options, &cancel);
    let results = tokio::select! {
        results = search => results.context("search failed")?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            bail!("search interrupted");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results.results)?);
        return Ok(());
    }

    for group in &results.results {
        println!(
            "{} {} {}  ({} matches)",
            group.session.adapter_icon,
            short_id(&group.session.id),
            group.session.name,
            group.match_count()
        );
        for msg in &group.messages {
            for m in &msg.matches {
                let line: Vec<char> = m.line.chars().collect();
                let before: String = line[..m.col_start].iter().collect();
                let hit: String = line[m.col_start..m.col_end].iter().collect();
                let after: String = line[m.col_end..].iter().collect();
                println!(
                    "    {:<9} {:<11} {}[{}]{}",
                    msg.role.as_str(),
                    m.block.as_str(),
                    truncate_runes(before.trim_start(), 40),
                    hit,
                    truncate_runes(&after, 40)
                );
            }
        }
    }

    let shown = results.visible_matches();
    println!();
    println!(
        "{} of {} matches{}{}",
        shown,
        results.total_matches,
        if results.truncated { " (truncated)" } else { "" },
        if results.timed_out { " (timed out)" } else { "" }
    );
    Ok(())
}

async fn cmd_export(loader: &SessionLoader, id: &str, out: Option<&Path>) -> Result<()> {
    let session = find_session(loader, id).await?;
    let adapter = adapter_for(loader, &session)?;

    let session_id = session.id.clone();
    let page = tokio::task::spawn_blocking(move || adapter.messages(&session_id, 0, usize::MAX))
        .await?
        .context("failed to load messages")?;
    let markdown = session_to_markdown(&session, &page.messages);

    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join(export_filename(&session));
            std::fs::write(&path, markdown)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        None => print!("{}", markdown),
    }
    Ok(())
}
