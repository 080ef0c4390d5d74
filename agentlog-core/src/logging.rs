//! Logging for agentlog
//!
//! Records go to `~/.local/state/agentlog/agentlog.log` (XDG state dir). The
//! terminal belongs to the front end, so nothing is printed unless
//! `[logging] stderr_level` asks for it, e.g. while running `agentlog watch`.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_PREFIX: &str = "agentlog.log";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Files rotate daily
/// and at most `max_files` are kept.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to open log file: {}", e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };
    let stderr_level = config
        .stderr_level
        .as_deref()
        .map(parse_level)
        .transpose()?;

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter);

    let stderr_layer = stderr_level.map(|level| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .with_filter(level)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        stderr = ?stderr_level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", level, e)))
}

fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| Error::Config(format!("invalid stderr log level {:?}", level)))
}

/// Test subscriber writing through the test harness; safe to call repeatedly.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes pending records when dropped; hold it for the life of the process.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        assert!(log_file_path().ends_with(LOG_FILE_PREFIX));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(parse_level("warn").unwrap(), LevelFilter::WARN);
        assert!(matches!(parse_level("loud"), Err(Error::Config(_))));
        assert!(level_filter("agentlog_core=debug,info").is_ok());
        assert!(level_filter("agentlog_core=nope").is_err());
    }
}
