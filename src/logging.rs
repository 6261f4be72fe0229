// src/logging.rs

//! Logging setup for `opgraph` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. the level passed in (usually `[logging].level` from the config file)
//! 2. `OPGRAPH_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for operation output.

use anyhow::{Result, anyhow};
use tracing_subscriber::fmt;

use crate::config::LogLevel;

pub const LOG_ENV_VAR: &str = "OPGRAPH_LOG";

/// Initialise the global logging subscriber.
///
/// Fails if a global subscriber was already installed.
pub fn init_logging(level: Option<LogLevel>) -> Result<()> {
    let level = effective_level(level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

fn effective_level(explicit: Option<LogLevel>, env: Option<&str>) -> tracing::Level {
    match explicit {
        Some(lvl) => lvl.as_tracing_level(),
        None => env
            .and_then(parse_level_str)
            .unwrap_or(tracing::Level::INFO),
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    s.parse::<LogLevel>().ok().map(LogLevel::as_tracing_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins_over_env() {
        assert_eq!(
            effective_level(Some(LogLevel::Error), Some("trace")),
            tracing::Level::ERROR
        );
    }

    #[test]
    fn env_level_is_used_when_nothing_explicit() {
        assert_eq!(effective_level(None, Some(" Debug ")), tracing::Level::DEBUG);
        assert_eq!(effective_level(None, Some("warning")), tracing::Level::WARN);
    }

    #[test]
    fn garbage_falls_back_to_info() {
        assert_eq!(effective_level(None, Some("chatty")), tracing::Level::INFO);
        assert_eq!(effective_level(None, None), tracing::Level::INFO);
        assert_eq!(parse_level_str(""), None);
    }
}
