//! Version-control oracle interface.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use super::status::RepoStatus;
use crate::error::OracleError;

/// Result of a single oracle query.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

/// Read-only view of a version-controlled working tree.
///
/// Implementations may be slow and may fail; callers decide how far a
/// failure reaches (a single file or the whole repository).
pub trait GitOracle: Send + Sync {
    /// Whether `path` is inside a working tree.
    fn is_repository<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<bool>>;

    /// Root of the working tree containing `path`, or `None` outside one.
    fn toplevel<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<Option<PathBuf>>>;

    /// Current branch and working-tree status sets.
    fn status<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<RepoStatus>>;

    /// Unified diff of `file` (relative to `path`) against the last commit.
    fn diff<'a>(&'a self, path: &'a Path, file: &'a str) -> BoxFuture<'a, OracleResult<String>>;
}
