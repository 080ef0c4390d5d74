//! Session browser reducer.
//!
//! [`SessionBrowser`] owns everything the front end displays: the session
//! list, the selection, the preview pager, the search modal and the current
//! toast. It never performs I/O. Incoming results arrive as [`CoreMsg`]
//! values and the work it wants done leaves as [`CoreCommand`] values for the
//! runtime to execute and answer.

use super::search_modal::{ContentSearchModal, ModalCommand};
use super::settle::SettleState;
use super::Toast;
use crate::adapter::{AdapterRef, MessagePage};
use crate::cache::{RenderCache, StalenessTokens, TokenKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::loader::{MessagePager, PagerUpdate};
use crate::search::{ContentSearchDebounce, SearchOptions, SearchResults};
use crate::types::Session;
use crate::watch::CoalescedRefresh;
use std::collections::HashMap;
use std::time::Duration;

/// Results delivered to the browser.
#[derive(Debug)]
pub enum CoreMsg {
    /// A full session list load finished
    SessionsLoaded(Vec<Session>),
    /// First page for the selected session
    PreviewLoaded {
        token: u64,
        session_id: String,
        page: Result<MessagePage>,
    },
    /// Reload of the selected session after a change on disk
    MessagesReloaded {
        token: u64,
        session_id: String,
        page: Result<MessagePage>,
    },
    CoalescedRefresh(CoalescedRefresh),
    SettleElapsed {
        token: u64,
    },
    ContentSearchDebounce(ContentSearchDebounce),
    ContentSearchResult {
        version: u64,
        result: Result<SearchResults>,
    },
}

/// Work requested by the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    LoadSessions,
    /// Fetch a page and answer with [`CoreMsg::PreviewLoaded`]
    LoadPreview {
        token: u64,
        adapter_id: String,
        session_id: String,
        offset: usize,
        limit: usize,
    },
    /// Fetch a page and answer with [`CoreMsg::MessagesReloaded`]
    ReloadMessages {
        token: u64,
        adapter_id: String,
        session_id: String,
        offset: usize,
        limit: usize,
    },
    /// Answer with [`CoreMsg::SettleElapsed`] after `delay`
    ScheduleSettle {
        token: u64,
        delay: Duration,
    },
    /// Answer with [`CoreMsg::ContentSearchDebounce`] after `delay`
    ScheduleDebounce {
        msg: ContentSearchDebounce,
        delay: Duration,
    },
    /// Run the search engine over the current session list
    RunSearch {
        version: u64,
        query: String,
        options: SearchOptions,
    },
    CancelSearch,
}

impl From<ModalCommand> for CoreCommand {
    fn from(cmd: ModalCommand) -> Self {
        match cmd {
            ModalCommand::Debounce { msg, delay } => CoreCommand::ScheduleDebounce { msg, delay },
            ModalCommand::StartSearch {
                version,
                query,
                options,
            } => CoreCommand::RunSearch {
                version,
                query,
                options,
            },
            ModalCommand::CancelSearch => CoreCommand::CancelSearch,
        }
    }
}

pub struct SessionBrowser {
    adapters: HashMap<String, AdapterRef>,
    sessions: Vec<Session>,
    selected: usize,
    pager: Option<MessagePager>,
    page_size: usize,
    tokens: StalenessTokens,
    settle: SettleState,
    search: ContentSearchModal,
    search_timeout: Duration,
    /// Wrapped lines per message
    render_cache: RenderCache<Vec<String>>,
    toast: Option<Toast>,
}

impl SessionBrowser {
    pub fn new(adapters: HashMap<String, AdapterRef>, config: &Config) -> Self {
        Self {
            adapters,
            sessions: Vec::new(),
            selected: 0,
            pager: None,
            page_size: config.pager.page_size.max(1),
            tokens: StalenessTokens::new(),
            settle: SettleState::new(),
            search: ContentSearchModal::new(config.search.debounce(), config.search.min_query_len),
            search_timeout: config.search.timeout(),
            render_cache: RenderCache::default(),
            toast: None,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.sessions.get(self.selected)
    }

    pub fn pager(&self) -> Option<&MessagePager> {
        self.pager.as_ref()
    }

    pub fn search(&self) -> &ContentSearchModal {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut ContentSearchModal {
        &mut self.search
    }

    pub fn render_cache(&self) -> &RenderCache<Vec<String>> {
        &self.render_cache
    }

    pub fn toast(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }

    /// Whether the skeleton placeholder should still be shown.
    pub fn is_settling(&self) -> bool {
        !self.settle.initial_load_done()
    }

    /// Commands to issue at startup.
    pub fn start(&mut self) -> Vec<CoreCommand> {
        vec![CoreCommand::LoadSessions]
    }

    pub fn select_next(&mut self) -> Vec<CoreCommand> {
        if self.selected + 1 < self.sessions.len() {
            self.selected += 1;
            return self.load_preview();
        }
        Vec::new()
    }

    pub fn select_previous(&mut self) -> Vec<CoreCommand> {
        if self.selected > 0 {
            self.selected -= 1;
            return self.load_preview();
        }
        Vec::new()
    }

    /// Toggle expansion of a message's tool output and thinking.
    pub fn toggle_expanded(&mut self, message_id: &str) -> bool {
        self.render_cache.toggle_expanded(message_id)
    }

    pub fn open_search(&mut self) {
        self.search.open();
    }

    /// Route a modal transition to the runtime.
    pub fn search_command(cmd: Option<ModalCommand>) -> Vec<CoreCommand> {
        cmd.into_iter().map(CoreCommand::from).collect()
    }

    fn load_preview(&mut self) -> Vec<CoreCommand> {
        let Some(session) = self.sessions.get(self.selected) else {
            self.pager = None;
            return Vec::new();
        };
        let Some(adapter) = self.adapters.get(&session.adapter_id) else {
            self.pager = None;
            return Vec::new();
        };
        self.pager = Some(MessagePager::new(
            adapter.clone(),
            session.id.clone(),
            self.page_size,
        ));
        vec![CoreCommand::LoadPreview {
            token: self.tokens.next(TokenKind::Preview),
            adapter_id: session.adapter_id.clone(),
            session_id: session.id.clone(),
            offset: 0,
            limit: self.page_size,
        }]
    }

    fn reload_selected(&mut self) -> Vec<CoreCommand> {
        let Some(pager) = &self.pager else {
            return Vec::new();
        };
        vec![CoreCommand::ReloadMessages {
            token: self.tokens.next(TokenKind::Messages),
            adapter_id: pager.adapter_id().to_string(),
            session_id: pager.session_id().to_string(),
            offset: pager.offset(),
            limit: self.page_size,
        }]
    }

    fn show_error(&mut self, err: &Error) {
        if err.is_silent() {
            return;
        }
        self.toast = Some(Toast::error(err.to_string()));
    }

    /// Clear the toast once it has been shown long enough.
    pub fn expire_toast(&mut self) {
        if self.toast.as_ref().is_some_and(Toast::is_expired) {
            self.toast = None;
        }
    }

    /// Apply one message and return the follow-up work.
    pub fn update(&mut self, msg: CoreMsg) -> Vec<CoreCommand> {
        match msg {
            CoreMsg::SessionsLoaded(sessions) => {
                let previous = self
                    .selected_session()
                    .map(|s| (s.adapter_id.clone(), s.id.clone()));
                self.sessions = sessions;
                self.selected = previous
                    .and_then(|(adapter, id)| {
                        self.sessions
                            .iter()
                            .position(|s| s.adapter_id == adapter && s.id == id)
                    })
                    .unwrap_or(0);

                let timer = self.settle.on_sessions_loaded();
                let mut cmds = vec![CoreCommand::ScheduleSettle {
                    token: timer.token,
                    delay: timer.delay,
                }];

                let selection_changed = match self.selected_session() {
                    Some(s) => self.pager.as_ref().map_or(true, |p| {
                        s.id != p.session_id() || s.adapter_id != p.adapter_id()
                    }),
                    None => false,
                };
                if self.sessions.is_empty() {
                    self.pager = None;
                } else if selection_changed {
                    cmds.extend(self.load_preview());
                }
                cmds
            }

            CoreMsg::PreviewLoaded {
                token,
                session_id,
                page,
            } => {
                if !self.tokens.is_current(TokenKind::Preview, token) {
                    return Vec::new();
                }
                self.apply_page(&session_id, page);
                Vec::new()
            }

            CoreMsg::MessagesReloaded {
                token,
                session_id,
                page,
            } => {
                if !self.tokens.is_current(TokenKind::Messages, token) {
                    return Vec::new();
                }
                self.apply_page(&session_id, page);
                Vec::new()
            }

            CoreMsg::CoalescedRefresh(refresh) => {
                let mut cmds = vec![CoreCommand::LoadSessions];
                let touches_selected = self
                    .pager
                    .as_ref()
                    .is_some_and(|p| refresh.touches(p.adapter_id(), p.session_id()));
                if touches_selected {
                    cmds.extend(self.reload_selected());
                }
                cmds
            }

            CoreMsg::SettleElapsed { token } => {
                if self.settle.on_settle_elapsed(token) {
                    tracing::debug!(sessions = self.sessions.len(), "Session list settled");
                }
                Vec::new()
            }

            CoreMsg::ContentSearchDebounce(msg) => Self::search_command(self.search.on_debounce(&msg)),

            CoreMsg::ContentSearchResult { version, result } => {
                if version == self.search.version() {
                    match &result {
                        Err(e) => self.show_error(e),
                        Ok(results) if results.timed_out => {
                            let timeout = Error::Timeout(self.search_timeout);
                            self.toast = Some(Toast::info(format!(
                                "Search {}; showing partial results",
                                timeout
                            )));
                        }
                        Ok(_) => {}
                    }
                }
                self.search.on_result(version, result);
                Vec::new()
            }
        }
    }

    fn apply_page(&mut self, session_id: &str, page: Result<MessagePage>) {
        let Some(pager) = self.pager.as_mut().filter(|p| p.session_id() == session_id) else {
            return;
        };
        match page {
            Ok(page) => match pager.apply(page) {
                PagerUpdate::Replaced => self.render_cache.clear(),
                PagerUpdate::Appended { changed, .. } => self
                    .render_cache
                    .invalidate_messages(changed.iter().map(String::as_str)),
                PagerUpdate::Unchanged => {}
            },
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to load messages");
                self.show_error(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RenderKey;
    use crate::watch::coalescer::ChangedSession;
    use crate::types::{Message, Role};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::path::PathBuf;

    fn session(id: &str, minutes: i64) -> Session {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minutes);
        Session {
            id: id.to_string(),
            adapter_id: "claude-code".into(),
            adapter_name: "Claude Code".into(),
            adapter_icon: "◆".into(),
            name: id.to_string(),
            slug: None,
            created_at: t,
            updated_at: t,
            message_count: 1,
            total_tokens: 0,
            file_size: 0,
            path: PathBuf::new(),
            cwd: None,
            git_branch: None,
            cli_version: None,
            model: None,
            is_huge: false,
        }
    }

    fn changed(adapter_id: &str, session_id: &str) -> CoalescedRefresh {
        CoalescedRefresh {
            sessions: vec![ChangedSession {
                adapter_id: Some(adapter_id.to_string()),
                session_id: session_id.to_string(),
            }],
            refresh_all: false,
        }
    }

    fn browser() -> SessionBrowser {
        let config = Config::default();
        let adapters = crate::adapter::create_all_adapters(&config)
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        SessionBrowser::new(adapters, &config)
    }

    fn page(ids: &[&str]) -> MessagePage {
        let messages = ids
            .iter()
            .map(|id| Message::new(*id, Role::User, Utc::now()))
            .collect::<Vec<_>>();
        MessagePage {
            total: messages.len(),
            messages,
            offset: 0,
        }
    }

    fn preview_token(cmds: &[CoreCommand]) -> u64 {
        cmds.iter()
            .find_map(|c| match c {
                CoreCommand::LoadPreview { token, .. } => Some(*token),
                _ => None,
            })
            .expect("preview requested")
    }

    #[test]
    fn test_sessions_loaded_schedules_settle_and_preview() {
        let mut b = browser();
        assert_eq!(b.start(), vec![CoreCommand::LoadSessions]);
        let cmds = b.update(CoreMsg::SessionsLoaded(vec![session("a", 2), session("b", 1)]));
        assert!(matches!(cmds[0], CoreCommand::ScheduleSettle { .. }));
        preview_token(&cmds);
        assert!(b.is_settling());
    }

    #[test]
    fn test_stale_preview_is_dropped() {
        let mut b = browser();
        let first = preview_token(&b.update(CoreMsg::SessionsLoaded(vec![
            session("a", 2),
            session("b", 1),
        ])));
        let second = preview_token(&b.select_next());

        b.update(CoreMsg::PreviewLoaded {
            token: first,
            session_id: "a".into(),
            page: Ok(page(&["stale"])),
        });
        assert!(b.pager().unwrap().messages().is_empty());

        b.update(CoreMsg::PreviewLoaded {
            token: second,
            session_id: "b".into(),
            page: Ok(page(&["m1"])),
        });
        assert_eq!(b.pager().unwrap().messages()[0].id, "m1");
    }

    #[test]
    fn test_refresh_of_selected_session_reloads_and_invalidates() {
        let mut b = browser();
        let token = preview_token(&b.update(CoreMsg::SessionsLoaded(vec![session("a", 1)])));
        b.update(CoreMsg::PreviewLoaded {
            token,
            session_id: "a".into(),
            page: Ok(page(&["m1", "m2"])),
        });
        b.render_cache()
            .insert(RenderKey::new("m2", 80, false), vec!["old".into()]);

        let cmds = b.update(CoreMsg::CoalescedRefresh(changed("claude-code", "a")));
        assert_eq!(cmds[0], CoreCommand::LoadSessions);
        let reload = match &cmds[1] {
            CoreCommand::ReloadMessages { token, .. } => *token,
            other => panic!("unexpected {:?}", other),
        };

        let mut next = page(&["m1", "m2", "m3"]);
        next.messages[1].push_text("edited");
        b.update(CoreMsg::MessagesReloaded {
            token: reload,
            session_id: "a".into(),
            page: Ok(next),
        });
        assert_eq!(b.pager().unwrap().messages().len(), 3);
        assert!(b.render_cache().get(&RenderKey::new("m2", 80, false)).is_none());
    }

    #[test]
    fn test_unrelated_refresh_only_reloads_list() {
        let mut b = browser();
        b.update(CoreMsg::SessionsLoaded(vec![session("a", 1)]));
        let cmds = b.update(CoreMsg::CoalescedRefresh(changed("claude-code", "zzz")));
        assert_eq!(cmds, vec![CoreCommand::LoadSessions]);
    }

    #[test]
    fn test_same_id_in_other_adapter_does_not_reload_pager() {
        let mut b = browser();
        let token = preview_token(&b.update(CoreMsg::SessionsLoaded(vec![session("a", 1)])));
        b.update(CoreMsg::PreviewLoaded {
            token,
            session_id: "a".into(),
            page: Ok(page(&["m1"])),
        });

        let cmds = b.update(CoreMsg::CoalescedRefresh(changed("codex", "a")));
        assert_eq!(cmds, vec![CoreCommand::LoadSessions]);

        let cmds = b.update(CoreMsg::CoalescedRefresh(changed("claude-code", "a")));
        assert!(matches!(cmds[1], CoreCommand::ReloadMessages { .. }));
    }

    #[test]
    fn test_selection_survives_reload() {
        let mut b = browser();
        b.update(CoreMsg::SessionsLoaded(vec![session("a", 2), session("b", 1)]));
        b.select_next();
        let cmds = b.update(CoreMsg::SessionsLoaded(vec![
            session("c", 3),
            session("a", 2),
            session("b", 1),
        ]));
        assert_eq!(b.selected_session().unwrap().id, "b");
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_load_error_becomes_toast() {
        let mut b = browser();
        let token = preview_token(&b.update(CoreMsg::SessionsLoaded(vec![session("a", 1)])));
        b.update(CoreMsg::PreviewLoaded {
            token,
            session_id: "a".into(),
            page: Err(Error::SessionNotFound("a".into())),
        });
        let toast = b.toast().unwrap();
        assert!(toast.is_error);
        assert_eq!(toast.duration, super::super::ERROR_TOAST_DURATION);
    }

    #[test]
    fn test_search_flow_through_browser() {
        let mut b = browser();
        b.open_search();
        let cmds = SessionBrowser::search_command(b.search_mut().set_query("te"));
        let v1 = match &cmds[0] {
            CoreCommand::ScheduleDebounce { msg, .. } => msg.clone(),
            other => panic!("unexpected {:?}", other),
        };
        let cmds = SessionBrowser::search_command(b.search_mut().set_query("test"));
        let v2 = match &cmds[0] {
            CoreCommand::ScheduleDebounce { msg, .. } => msg.clone(),
            other => panic!("unexpected {:?}", other),
        };

        assert!(b.update(CoreMsg::ContentSearchDebounce(v1.clone())).is_empty());
        let run = b.update(CoreMsg::ContentSearchDebounce(v2.clone()));
        assert!(matches!(&run[0], CoreCommand::RunSearch { query, .. } if query == "test"));

        b.update(CoreMsg::ContentSearchResult {
            version: v1.version,
            result: Ok(SearchResults {
                query: "te".into(),
                ..SearchResults::default()
            }),
        });
        assert!(b.search().results().is_none());

        b.update(CoreMsg::ContentSearchResult {
            version: v2.version,
            result: Ok(SearchResults {
                query: "test".into(),
                ..SearchResults::default()
            }),
        });
        assert_eq!(b.search().results().unwrap().query, "test");
    }

    #[test]
    fn test_timed_out_search_shows_info_toast() {
        let mut b = browser();
        b.open_search();
        let cmds = SessionBrowser::search_command(b.search_mut().set_query("slow"));
        let msg = match &cmds[0] {
            CoreCommand::ScheduleDebounce { msg, .. } => msg.clone(),
            other => panic!("unexpected {:?}", other),
        };
        b.update(CoreMsg::ContentSearchDebounce(msg.clone()));
        b.update(CoreMsg::ContentSearchResult {
            version: msg.version,
            result: Ok(SearchResults {
                query: "slow".into(),
                truncated: true,
                timed_out: true,
                ..SearchResults::default()
            }),
        });

        let toast = b.toast().unwrap();
        assert!(!toast.is_error);
        assert!(toast.message.contains("timed out after 30s"));
        assert!(b.search().results().unwrap().timed_out);
    }
}
