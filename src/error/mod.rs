//! Error types and Result aliases for repomon.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.
//!
//! Only registry mutations surface these errors to callers. Failures while
//! computing a snapshot are folded into the snapshot itself.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::RepoId;

/// Result type alias using repomon's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repomon operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested path does not exist.
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The oracle rejected the path as a repository.
    #[error("not a git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    /// A repository with the same canonical path is already registered.
    #[error("repository already registered: {0}")]
    AlreadyRegistered(RepoId),

    /// No repository with this id is registered.
    #[error("repository not registered: {0}")]
    RepositoryNotRegistered(RepoId),

    /// A version-control command failed.
    #[error("git command failed: {0}")]
    OracleCommandFailed(#[from] OracleError),

    /// A working-tree file could not be read.
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: String, reason: String },

    /// File watching error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Persistent store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Version-control oracle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle binary could not be started at all.
    #[error("git is unavailable: {0}")]
    Unavailable(String),

    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The command did not finish in time and was killed.
    #[error("`{command}` timed out after {}ms", .after.as_millis())]
    Timeout { command: String, after: Duration },

    /// The command output could not be interpreted.
    #[error("unexpected git output: {0}")]
    InvalidOutput(String),
}

/// File watcher errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },

    /// An established subscription reported an unrecoverable failure.
    #[error("event stream failed: {0}")]
    StreamFailed(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored value could not be encoded or decoded.
    #[error("invalid value for key '{key}': {reason}")]
    Serialization { key: String, reason: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a per-file read error.
    pub fn file_read(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl StorageError {
    /// Create a serialization error for a key.
    pub fn serialization(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl WatcherError {
    /// Create a watch failure for a path.
    pub fn watch_failed(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::WatchFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
