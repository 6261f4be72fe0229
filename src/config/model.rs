// src/config/model.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::ExecuteOptions;

/// Engine configuration as read from a TOML file.
///
/// ```toml
/// [run]
/// name = "nightly"
///
/// [executor]
/// max_concurrency = 4
///
/// [logging]
/// level = "debug"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub executor: ExecutorSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[run]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Name reported to monitors and used for the root runtime scope.
    #[serde(default = "default_run_name")]
    pub name: String,
}

fn default_run_name() -> String {
    "run".to_string()
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            name: default_run_name(),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    /// Maximum number of tasks in flight. Omitted means unbounded.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// If `None`, `init_logging` falls back to `OPGRAPH_LOG`, then `info`.
    #[serde(default)]
    pub level: Option<LogLevel>,
}

/// Log verbosity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[serde(alias = "warning")]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(s)
    }
}

/// Validated engine configuration.
///
/// Only obtainable through `EngineConfig::try_from(RawEngineConfig)` or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    run_name: String,
    max_concurrency: Option<usize>,
    log_level: Option<LogLevel>,
}

impl EngineConfig {
    pub(crate) fn new_unchecked(run: RunSection, executor: ExecutorSection, logging: LoggingSection) -> Self {
        Self {
            run_name: run.name,
            max_concurrency: executor.max_concurrency,
            log_level: logging.level,
        }
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            max_concurrency: self.max_concurrency,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new_unchecked(
            RunSection::default(),
            ExecutorSection::default(),
            LoggingSection::default(),
        )
    }
}
