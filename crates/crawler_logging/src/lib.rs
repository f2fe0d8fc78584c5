//! Shared logging setup for the crawler binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "crawler=info,crawler_db=info";

/// Logging configuration for a crawler process.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Debug output on stderr instead of the default filter.
    pub verbose: bool,
    /// Overrides `$CRAWLER_HOME/logs`.
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber: a daily rolling file plus stderr.
///
/// The returned guard flushes the file writer on drop, so keep it alive for the
/// lifetime of the process.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir()?,
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(&log_dir, log_file_name(config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("crawler=debug,crawler_db=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// The crawler home directory: `$CRAWLER_HOME`, else `~/.crawler`.
pub fn crawler_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("CRAWLER_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".crawler"))
}

/// `<crawler home>/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(crawler_home()?.join("logs"))
}

fn log_file_name(app_name: &str) -> String {
    let sanitized: String = app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    format!("{}.log", sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_is_sanitized() {
        assert_eq!(log_file_name("crawler"), "crawler.log");
        assert_eq!(log_file_name("crawler run/priority"), "crawler_run_priority.log");
    }

    #[test]
    fn test_init_logging_creates_log_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log_dir = tmp.path().join("nested").join("logs");

        let guard = init_logging(LogConfig {
            app_name: "crawler-test",
            verbose: false,
            log_dir: Some(log_dir.clone()),
        })
        .unwrap();
        tracing::info!("written to the rolling file");
        drop(guard);

        assert!(log_dir.is_dir());
    }
}
