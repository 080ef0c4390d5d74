//! Event loop for `agentlog watch`.
//!
//! One task owns the [`SessionBrowser`]. Watch events are coalesced into
//! refresh requests, the browser turns every incoming message into commands,
//! and each command runs on a background task that answers with a new
//! message. The loop itself never waits on I/O.

use std::collections::HashMap;
use std::sync::Arc;

use agentlog_core::state::{CoreCommand, CoreMsg, ModalState, SessionBrowser};
use agentlog_core::watch::hub::pump;
use agentlog_core::watch::{Coalescer, WatchHub};
use agentlog_core::{AdapterRef, Config, ContentSearchEngine, Error, SessionLoader};
use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Runtime {
    loader: Arc<SessionLoader>,
    adapters: HashMap<String, AdapterRef>,
    engine: ContentSearchEngine,
    tx: mpsc::UnboundedSender<CoreMsg>,
    search_cancel: Option<CancellationToken>,
}

impl Runtime {
    fn send_later(&self, delay: std::time::Duration, msg: CoreMsg) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    fn fetch_page(
        &self,
        reload: bool,
        token: u64,
        adapter_id: &str,
        session_id: String,
        offset: usize,
        limit: usize,
    ) {
        let Some(adapter) = self.adapters.get(adapter_id).cloned() else {
            tracing::warn!(adapter = adapter_id, "Page requested for unknown adapter");
            return;
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let id = session_id.clone();
            let page = tokio::task::spawn_blocking(move || adapter.messages(&id, offset, limit))
                .await
                .unwrap_or_else(|e| Err(Error::Io(std::io::Error::other(e.to_string()))));
            let msg = if reload {
                CoreMsg::MessagesReloaded {
                    token,
                    session_id,
                    page,
                }
            } else {
                CoreMsg::PreviewLoaded {
                    token,
                    session_id,
                    page,
                }
            };
            let _ = tx.send(msg);
        });
    }

    fn execute(&mut self, cmd: CoreCommand, browser: &SessionBrowser) {
        match cmd {
            CoreCommand::LoadSessions => {
                let loader = Arc::clone(&self.loader);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if let Some(sessions) = loader.load().await {
                        let _ = tx.send(CoreMsg::SessionsLoaded(sessions));
                    }
                });
            }
            CoreCommand::LoadPreview {
                token,
                adapter_id,
                session_id,
                offset,
                limit,
            } => self.fetch_page(false, token, &adapter_id, session_id, offset, limit),
            CoreCommand::ReloadMessages {
                token,
                adapter_id,
                session_id,
                offset,
                limit,
            } => self.fetch_page(true, token, &adapter_id, session_id, offset, limit),
            CoreCommand::ScheduleSettle { token, delay } => {
                self.send_later(delay, CoreMsg::SettleElapsed { token })
            }
            CoreCommand::ScheduleDebounce { msg, delay } => {
                self.send_later(delay, CoreMsg::ContentSearchDebounce(msg))
            }
            CoreCommand::RunSearch {
                version,
                query,
                options,
            } => {
                if let Some(previous) = self.search_cancel.take() {
                    previous.cancel();
                }
                let cancel = CancellationToken::new();
                self.search_cancel = Some(cancel.clone());

                let sessions = browser.sessions().to_vec();
                let adapters = self.adapters.clone();
                let engine = self.engine.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = engine
                        .search(&query, &sessions, &adapters, options, &cancel)
                        .await;
                    let _ = tx.send(CoreMsg::ContentSearchResult { version, result });
                });
            }
            CoreCommand::CancelSearch => {
                if let Some(cancel) = self.search_cancel.take() {
                    cancel.cancel();
                }
            }
        }
    }
}

/// Follow changes until Ctrl-C, optionally keeping a live search up to date.
pub async fn run(
    loader: Arc<SessionLoader>,
    config: &Config,
    search: Option<String>,
) -> Result<()> {
    let adapters = loader.adapter_map();
    let mut browser = SessionBrowser::new(adapters.clone(), config);

    let (mut hub, events) = WatchHub::start(loader.adapters(), loader.project_root(), &config.watch);
    let (coalescer, mut refreshes) = Coalescer::new(&config.watch);
    let pump_task = tokio::spawn(pump(events, coalescer.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut runtime = Runtime {
        loader: Arc::clone(&loader),
        adapters,
        engine: ContentSearchEngine::new(config.search.clone()),
        tx,
        search_cancel: None,
    };

    println!(
        "Watching {} for changes ({} watcher(s)); Ctrl-C to stop",
        loader.project_root().display(),
        hub.len()
    );
    tracing::info!(watchers = hub.len(), "Watch started");

    if search.is_some() {
        browser.open_search();
    }
    for cmd in browser.start() {
        runtime.execute(cmd, &browser);
    }

    let mut shown_messages = 0usize;
    let mut settled = false;
    let mut last_toast = None;
    loop {
        let msg = tokio::select! {
            Some(msg) = rx.recv() => msg,
            Some(refresh) = refreshes.recv() => {
                tracing::debug!(
                    sessions = refresh.sessions.len(),
                    refresh_all = refresh.refresh_all,
                    "Coalesced refresh"
                );
                CoreMsg::CoalescedRefresh(refresh)
            }
            _ = tokio::signal::ctrl_c() => break,
        };

        let sessions_loaded = matches!(msg, CoreMsg::SessionsLoaded(_));
        let search_result = matches!(msg, CoreMsg::ContentSearchResult { .. });
        let preview = matches!(msg, CoreMsg::PreviewLoaded { .. });
        let previous_session = browser.pager().map(|p| p.session_id().to_string());

        let mut cmds = browser.update(msg);
        if sessions_loaded {
            if let Some(query) = &search {
                cmds.extend(SessionBrowser::search_command(
                    browser.search_mut().set_query(query),
                ));
            }
        }
        for cmd in cmds {
            runtime.execute(cmd, &browser);
        }

        if !settled && !browser.is_settling() {
            settled = true;
            println!("{} session(s)", browser.sessions().len());
        }
        if let Some(pager) = browser.pager() {
            if previous_session.as_deref() != Some(pager.session_id()) {
                if let Some(s) = browser.selected_session() {
                    println!("following {} {}", s.adapter_icon, s.name);
                }
            }
            if preview {
                shown_messages = pager.messages().len();
            }
            for msg in pager.messages().iter().skip(shown_messages) {
                let first = msg.content.lines().next().unwrap_or("");
                println!("  {:<9} {}", msg.role.as_str(), first);
            }
            shown_messages = pager.messages().len();
        }
        if search_result && browser.search().state() == ModalState::OpenResults {
            if let Some(results) = browser.search().results() {
                println!(
                    "search {:?}: {} match(es) in {} session(s){}",
                    results.query,
                    results.total_matches,
                    results.results.len(),
                    if results.truncated { " (truncated)" } else { "" }
                );
            }
        }
        if let Some(toast) = browser.toast() {
            if last_toast != Some(toast.shown_at) {
                last_toast = Some(toast.shown_at);
                let prefix = if toast.is_error { "error" } else { "note" };
                eprintln!("{}: {}", prefix, toast.message);
            }
        }
        browser.expire_toast();
    }

    coalescer.stop();
    hub.close();
    pump_task.abort();
    if let Some(cancel) = runtime.search_cancel.take() {
        cancel.cancel();
    }
    tracing::info!(dropped = hub.dropped(), "Watch stopped");
    Ok(())
}
