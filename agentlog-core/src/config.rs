//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/agentlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/agentlog/` (~/.config/agentlog/)
//! - State/Logs: `$XDG_STATE_HOME/agentlog/` (~/.local/state/agentlog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Expand a leading `~/` against the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Adapter root overrides
    #[serde(default)]
    pub adapters: AdapterOverrides,

    /// Watcher and coalescer tuning
    #[serde(default)]
    pub watch: WatchConfig,

    /// Content search tuning
    #[serde(default)]
    pub search: SearchConfig,

    /// Message pager tuning
    #[serde(default)]
    pub pager: PagerConfig,

    /// Session timestamp fallback order
    #[serde(default)]
    pub timestamps: TimestampConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Override paths for assistant directories
#[derive(Debug, Deserialize, Default)]
pub struct AdapterOverrides {
    /// Override path for Claude Code data (default ~/.claude)
    pub claude_code_path: Option<PathBuf>,
    /// Override path for Codex data (default ~/.codex)
    pub codex_path: Option<PathBuf>,
}

impl AdapterOverrides {
    pub fn claude_code_root(&self) -> PathBuf {
        self.claude_code_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| home_dir().join(".claude"))
    }

    pub fn codex_root(&self) -> PathBuf {
        self.codex_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| home_dir().join(".codex"))
    }
}

/// Watcher and coalescer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Per-event debounce applied by each adapter watcher
    #[serde(default = "default_watch_debounce_ms")]
    pub debounce_ms: u64,

    /// Quiet window of the coalescer
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Unique session IDs per flush before falling back to a full refresh
    #[serde(default = "default_max_coalesced_ids")]
    pub max_coalesced_ids: usize,

    /// Observed file size from which the coalescer window is extended
    #[serde(default = "default_large_file_bytes")]
    pub large_file_bytes: u64,

    /// Capacity of the merged watch event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_watch_debounce_ms(),
            coalesce_ms: default_coalesce_ms(),
            max_coalesced_ids: default_max_coalesced_ids(),
            large_file_bytes: default_large_file_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }
}

fn default_watch_debounce_ms() -> u64 {
    100
}

fn default_coalesce_ms() -> u64 {
    250
}

fn default_max_coalesced_ids() -> usize {
    10
}

fn default_large_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_channel_capacity() -> usize {
    32
}

/// Content search configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_search_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,

    /// Stop admitting sessions once this many matches were found
    #[serde(default = "default_hard_match_cap")]
    pub hard_match_cap: usize,

    /// Matches returned to the caller
    #[serde(default = "default_visible_match_cap")]
    pub visible_match_cap: usize,

    /// Worker count; defaults to the CPU count clamped to 4..=16
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            debounce_ms: default_search_debounce_ms(),
            min_query_len: default_min_query_len(),
            hard_match_cap: default_hard_match_cap(),
            visible_match_cap: default_visible_match_cap(),
            concurrency: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn worker_count(&self) -> usize {
        self.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(4, 16)
        })
    }
}

fn default_search_timeout_secs() -> u64 {
    30
}

fn default_search_debounce_ms() -> u64 {
    200
}

fn default_min_query_len() -> usize {
    2
}

fn default_hard_match_cap() -> usize {
    500
}

fn default_visible_match_cap() -> usize {
    100
}

/// Message pager configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PagerConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    500
}

/// Where a session's creation time may come from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Timestamp of the first record in the file
    FirstRecord,
    /// Timestamp carried by a session metadata record
    SessionMeta,
    /// Modification time of the file
    FileMtime,
}

/// Ordered fallback chain for `Session::created_at`.
#[derive(Debug, Deserialize, Clone)]
pub struct TimestampConfig {
    #[serde(default = "default_timestamp_fallback")]
    pub fallback: Vec<TimestampSource>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            fallback: default_timestamp_fallback(),
        }
    }
}

fn default_timestamp_fallback() -> Vec<TimestampSource> {
    vec![
        TimestampSource::FirstRecord,
        TimestampSource::SessionMeta,
        TimestampSource::FileMtime,
    ]
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Also print records at or above this level to stderr
    #[serde(default)]
    pub stderr_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            stderr_level: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        if config.search.min_query_len == 0 {
            return Err(Error::Config(
                "search.min_query_len must be at least 1".to_string(),
            ));
        }
        if config.pager.page_size == 0 {
            return Err(Error::Config(
                "pager.page_size must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/agentlog/config.toml`
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// `$XDG_CONFIG_HOME/agentlog/`
    pub fn config_dir() -> PathBuf {
        xdg_config_home().join("agentlog")
    }

    /// `$XDG_STATE_HOME/agentlog/` (logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("agentlog")
    }

    /// `$XDG_STATE_HOME/agentlog/agentlog.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("agentlog.log")
    }
}

/// Persisted UI preferences written by the presentation layer.
///
/// Only the sidebar width is read here; everything else in the file belongs
/// to the front end.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct UiState {
    #[serde(default, rename = "sidebarWidth", alias = "sidebar_width")]
    pub sidebar_width: Option<u16>,
}

impl UiState {
    /// `$XDG_CONFIG_HOME/agentlog/state.json`
    pub fn path() -> PathBuf {
        Config::config_dir().join("state.json")
    }

    /// Load preferences, falling back to defaults on any problem.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable UI state");
            Self::default()
        })
    }
}
