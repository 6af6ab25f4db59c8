//! In-memory oracle for embedders and tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use super::oracle::{GitOracle, OracleResult};
use super::status::RepoStatus;
use crate::error::OracleError;

#[derive(Default)]
struct Repos {
    statuses: HashMap<PathBuf, RepoStatus>,
    diffs: HashMap<(PathBuf, String), OracleResult<String>>,
}

/// Oracle answering from scripted state.
///
/// Counts status queries and tracks how many run at once, so callers can
/// check debouncing and single-flight behavior.
#[derive(Default)]
pub struct MemoryOracle {
    repos: Mutex<Repos>,
    unavailable: AtomicBool,
    latency: Mutex<Duration>,
    status_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as a repository with the given status.
    pub fn set_status(&self, path: impl Into<PathBuf>, status: RepoStatus) {
        self.repos.lock().statuses.insert(path.into(), status);
    }

    /// Stop treating `path` as a repository.
    pub fn remove_repository(&self, path: &Path) {
        self.repos.lock().statuses.remove(path);
    }

    /// Script the diff returned for one file.
    pub fn set_diff(&self, path: impl Into<PathBuf>, file: impl Into<String>, diff: impl Into<String>) {
        self.repos
            .lock()
            .diffs
            .insert((path.into(), file.into()), Ok(diff.into()));
    }

    /// Script a diff failure for one file.
    pub fn fail_diff(&self, path: impl Into<PathBuf>, file: impl Into<String>, error: OracleError) {
        self.repos
            .lock()
            .diffs
            .insert((path.into(), file.into()), Err(error));
    }

    /// Make every query fail as if git were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay applied to every status query.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of status queries served so far.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Highest number of status queries observed running concurrently.
    #[must_use]
    pub fn max_concurrent_status(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> OracleResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(OracleError::Unavailable("git: not found".to_string()))
        } else {
            Ok(())
        }
    }
}

impl GitOracle for MemoryOracle {
    fn is_repository<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<bool>> {
        async move {
            self.check_available()?;
            Ok(self.repos.lock().statuses.contains_key(path))
        }
        .boxed()
    }

    fn toplevel<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<Option<PathBuf>>> {
        async move {
            self.check_available()?;
            // Innermost registered repository enclosing `path`.
            Ok(self
                .repos
                .lock()
                .statuses
                .keys()
                .filter(|root| path.starts_with(root))
                .max_by_key(|root| root.components().count())
                .cloned())
        }
        .boxed()
    }

    fn status<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, OracleResult<RepoStatus>> {
        async move {
            self.check_available()?;
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let result = self.repos.lock().statuses.get(path).cloned().ok_or_else(|| {
                OracleError::CommandFailed {
                    command: "git status".to_string(),
                    stderr: "fatal: not a git repository".to_string(),
                }
            });
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
        .boxed()
    }

    fn diff<'a>(&'a self, path: &'a Path, file: &'a str) -> BoxFuture<'a, OracleResult<String>> {
        async move {
            self.check_available()?;
            self.repos
                .lock()
                .diffs
                .get(&(path.to_path_buf(), file.to_string()))
                .cloned()
                .unwrap_or_else(|| {
                    Err(OracleError::CommandFailed {
                        command: format!("git diff HEAD -- {file}"),
                        stderr: "no scripted diff".to_string(),
                    })
                })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_repository() {
        let oracle = MemoryOracle::new();
        oracle.set_status("/r", RepoStatus::clean("main"));
        oracle.set_diff("/r", "a.rs", "@@ -1 +1 @@\n-a\n+b\n");

        assert!(oracle.is_repository(Path::new("/r")).await.unwrap());
        assert!(!oracle.is_repository(Path::new("/other")).await.unwrap());
        assert_eq!(
            oracle.toplevel(Path::new("/r/src/bin")).await.unwrap(),
            Some(PathBuf::from("/r"))
        );
        assert_eq!(oracle.toplevel(Path::new("/rust")).await.unwrap(), None);
        assert_eq!(oracle.status(Path::new("/r")).await.unwrap().branch, "main");
        assert!(oracle.diff(Path::new("/r"), "a.rs").await.is_ok());
        assert!(oracle.diff(Path::new("/r"), "b.rs").await.is_err());
        assert_eq!(oracle.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let oracle = MemoryOracle::new();
        oracle.set_status("/r", RepoStatus::clean("main"));
        oracle.set_unavailable(true);
        assert!(matches!(
            oracle.is_repository(Path::new("/r")).await,
            Err(OracleError::Unavailable(_))
        ));
    }
}
