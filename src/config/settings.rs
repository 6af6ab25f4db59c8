//! Configuration settings and validation.

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Quiet period after working-tree edits before a snapshot is computed.
pub const DEFAULT_CONTENT_DEBOUNCE: Duration = Duration::from_millis(400);

/// Quiet period after `.git` metadata changes; git may still be writing.
pub const DEFAULT_METADATA_DEBOUNCE: Duration = Duration::from_millis(800);

/// How long a single path must stay quiet before its event is forwarded.
pub const DEFAULT_STABILIZATION_DELAY: Duration = Duration::from_millis(300);

/// Upper bound on a single git invocation.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Main configuration for repomon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the `SQLite` state database.
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Debounce window for working-tree events.
    pub content_debounce: Duration,

    /// Debounce window for `.git` metadata events.
    pub metadata_debounce: Duration,

    /// Per-path write stabilization delay.
    pub stabilization_delay: Duration,

    /// Timeout applied to every git command.
    pub oracle_timeout: Duration,

    /// Git executable.
    pub git_binary: String,

    /// Extra gitignore-style globs excluded from the working-tree stream.
    pub extra_ignores: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            content_debounce: DEFAULT_CONTENT_DEBOUNCE,
            metadata_debounce: DEFAULT_METADATA_DEBOUNCE,
            stabilization_delay: DEFAULT_STABILIZATION_DELAY,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            git_binary: "git".to_string(),
            extra_ignores: Vec::new(),
        }
    }
}

/// Timing and filtering knobs handed to each watch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub content_debounce: Duration,
    pub metadata_debounce: Duration,
    pub stabilization_delay: Duration,
    pub extra_ignores: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.content_debounce.is_zero() {
            return Err(Error::config("content_debounce cannot be 0"));
        }

        if self.metadata_debounce.is_zero() {
            return Err(Error::config("metadata_debounce cannot be 0"));
        }

        // Stabilization happens inside the debounce window, not after it.
        if self.stabilization_delay >= self.content_debounce {
            return Err(Error::config(format!(
                "stabilization_delay ({}ms) must be shorter than content_debounce ({}ms)",
                self.stabilization_delay.as_millis(),
                self.content_debounce.as_millis()
            )));
        }

        if self.oracle_timeout.is_zero() {
            return Err(Error::config("oracle_timeout cannot be 0"));
        }

        if self.git_binary.trim().is_empty() {
            return Err(Error::config("git_binary cannot be empty"));
        }

        Ok(())
    }

    /// Get the path to the `SQLite` database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("repomon.db")
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            content_debounce: self.content_debounce,
            metadata_debounce: self.metadata_debounce,
            stabilization_delay: self.stabilization_delay,
            extra_ignores: self.extra_ignores.clone(),
        }
    }
}
