/// Tracing setup.
///
/// The TUI owns the terminal, so in that mode everything goes to a log file
/// through a non-blocking writer. Plain modes write to stderr, leaving stdout
/// for the task list.
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_ENV: &str = "TASKWIRE_LOG";
const DEFAULT_DIRECTIVE: &str = "taskwire=info";
const LOG_FILE: &str = "taskwire.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Log to stderr. Used by `--list`, `--watch` and `--suggest`.
pub fn init_stderr() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter())
        .try_init()
        .context("Failed to install log subscriber")
}

/// Log to `$XDG_STATE_HOME/taskwire/taskwire.log`.
///
/// The returned guard flushes the writer on drop; keep it alive until exit.
pub fn init_file() -> Result<(WorkerGuard, PathBuf)> {
    let dir = state_dir().join("taskwire");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(&dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter())
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok((guard, dir.join(LOG_FILE)))
}

fn state_dir() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("state"))
        })
        .unwrap_or_else(std::env::temp_dir)
}
