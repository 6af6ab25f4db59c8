//! Snapshot computation.
//!
//! Turns one oracle status query plus per-file diffs into a [`Snapshot`].
//! Only repository-level failures produce an error snapshot; anything that
//! goes wrong for a single file becomes a placeholder diff for that file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::Instrument;

use super::oracle::GitOracle;
use super::placeholder;
use crate::models::{ChangeKind, FileChange, RepoId, Snapshot};
use crate::observability::spans;
use crate::{Error, Result};

/// Error text of the snapshot returned for a path outside version control.
pub const NOT_A_REPOSITORY: &str = "Not a Git repository";

/// Files diffed concurrently within one computation.
const FILE_CONCURRENCY: usize = 8;

/// Computes snapshots, at most one at a time per repository.
pub struct StatusComputer {
    oracle: Arc<dyn GitOracle>,
    in_flight: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl StatusComputer {
    /// Create a computer backed by `oracle`.
    pub fn new(oracle: Arc<dyn GitOracle>) -> Self {
        Self {
            oracle,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The oracle used for queries.
    #[must_use]
    pub fn oracle(&self) -> &Arc<dyn GitOracle> {
        &self.oracle
    }

    /// Compute a snapshot of `repo`.
    ///
    /// Never fails: repository-level problems are reported inside the
    /// returned snapshot. A second call for the same repository waits for
    /// the first to finish.
    pub async fn compute(&self, repo: &Path) -> Snapshot {
        let gate = self.gate(repo);
        let _guard = gate.lock().await;
        self.compute_unguarded(repo)
            .instrument(spans::compute_span(repo))
            .await
    }

    /// Drop the per-repository gate once a repository is deregistered.
    pub fn forget(&self, repo: &Path) {
        self.in_flight.lock().remove(repo);
    }

    fn gate(&self, repo: &Path) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.in_flight
                .lock()
                .entry(repo.to_path_buf())
                .or_default(),
        )
    }

    async fn compute_unguarded(&self, repo: &Path) -> Snapshot {
        let id = RepoId::new(repo);

        match self.oracle.is_repository(repo).await {
            Ok(true) => {}
            Ok(false) => return Snapshot::failed(id, NOT_A_REPOSITORY),
            Err(e) => {
                tracing::warn!(error = %e, "Repository check failed");
                return Snapshot::failed(id, e.to_string());
            }
        }

        let status = match self.oracle.status(repo).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "Status query failed");
                return Snapshot::failed(id, e.to_string());
            }
        };

        let files: Vec<FileChange> = stream::iter(status.classify())
            .map(|(file, kind)| self.file_change(repo, file, kind))
            .buffered(FILE_CONCURRENCY)
            .collect()
            .await;

        let degraded = files.iter().filter(|f| f.is_degraded()).count();
        tracing::debug!(
            branch = %status.branch,
            files = files.len(),
            degraded,
            "Computed status"
        );

        Snapshot::ready(id, status.branch, files)
    }

    async fn file_change(&self, repo: &Path, file: String, kind: ChangeKind) -> FileChange {
        match kind {
            ChangeKind::Added => added_change(repo, file).await,
            ChangeKind::Deleted => self.deleted_change(repo, file).await,
            ChangeKind::Modified => self.modified_change(repo, file).await,
        }
    }

    async fn deleted_change(&self, repo: &Path, file: String) -> FileChange {
        match self.oracle.diff(repo, &file).await {
            Ok(diff) if !diff.trim().is_empty() => FileChange::new(file, ChangeKind::Deleted, diff),
            Ok(_) => {
                let text = placeholder::deleted(&file);
                FileChange::degraded(file, ChangeKind::Deleted, text, "git produced an empty diff")
            }
            Err(e) => {
                tracing::warn!(%file, error = %e, "Diff of deleted file failed");
                let text = placeholder::deleted(&file);
                FileChange::degraded(file, ChangeKind::Deleted, text, e.to_string())
            }
        }
    }

    /// Modified in the index but gone from disk: git can still diff it.
    async fn vanished_change(&self, repo: &Path, file: String) -> FileChange {
        if let Ok(diff) = self.oracle.diff(repo, &file).await {
            if !diff.trim().is_empty() {
                return FileChange::new(file, ChangeKind::Modified, diff);
            }
        }
        let text = placeholder::modified(
            &file,
            "File no longer exists",
            "File reported as modified but not found",
        );
        FileChange::degraded(
            file,
            ChangeKind::Modified,
            text,
            "file reported as modified but not found",
        )
    }

    async fn modified_change(&self, repo: &Path, file: String) -> FileChange {
        match tokio::fs::metadata(repo.join(&file)).await {
            Ok(meta) if meta.is_dir() => {
                let text = placeholder::modified(&file, "Directory", "Directory: modified");
                return FileChange::degraded(
                    file,
                    ChangeKind::Modified,
                    text,
                    "path is a directory",
                );
            }
            Ok(_) => {}
            Err(_) => return self.vanished_change(repo, file).await,
        }

        let after = format!("File modified: {file}");
        match self.oracle.diff(repo, &file).await {
            Ok(diff) if !diff.trim().is_empty() => {
                FileChange::new(file, ChangeKind::Modified, diff)
            }
            Ok(_) => {
                let text = placeholder::modified(&file, "File content before", &after);
                FileChange::degraded(file, ChangeKind::Modified, text, "git produced an empty diff")
            }
            Err(e) => {
                tracing::warn!(%file, error = %e, "Diff of modified file failed");
                let text = placeholder::modified(&file, "File content before", &after);
                FileChange::degraded(file, ChangeKind::Modified, text, e.to_string())
            }
        }
    }
}

/// Build the change for a created or untracked path from disk content.
async fn added_change(repo: &Path, file: String) -> FileChange {
    let path = repo.join(&file);

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => {
            let text = placeholder::added(&file, "Directory");
            return FileChange::degraded(file, ChangeKind::Added, text, "path is a directory");
        }
        Ok(_) => {}
        Err(e) => {
            let err = Error::file_read(file.as_str(), e);
            tracing::warn!(error = %err, "Skipping unreadable file");
            let text = placeholder::added(&file, "Unreadable file");
            return FileChange::degraded(file, ChangeKind::Added, text, err.to_string());
        }
    }

    match read_text(&path, &file).await {
        Ok(content) => {
            let text = placeholder::new_file(&file, &content);
            FileChange::new(file, ChangeKind::Added, text)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Skipping unreadable file");
            let label = if matches!(&err, Error::FileReadFailed { reason, .. } if reason == BINARY_REASON) {
                "Binary file"
            } else {
                "Unreadable file"
            };
            let text = placeholder::added(&file, label);
            FileChange::degraded(file, ChangeKind::Added, text, err.to_string())
        }
    }
}

const BINARY_REASON: &str = "binary content";

async fn read_text(path: &Path, file: &str) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::file_read(file, e))?;
    if bytes.contains(&0) {
        return Err(Error::file_read(file, BINARY_REASON));
    }
    String::from_utf8(bytes).map_err(|_| Error::file_read(file, BINARY_REASON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::git::{MemoryOracle, RepoStatus};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, Arc<MemoryOracle>) {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().canonicalize().unwrap();
        let oracle = Arc::new(MemoryOracle::new());
        (tmp, repo, oracle)
    }

    fn computer(oracle: &Arc<MemoryOracle>) -> StatusComputer {
        StatusComputer::new(Arc::clone(oracle) as Arc<dyn GitOracle>)
    }

    #[tokio::test]
    async fn test_clean_repository() {
        let (_tmp, repo, oracle) = setup();
        oracle.set_status(&repo, RepoStatus::clean("main"));

        let snapshot = computer(&oracle).compute(&repo).await;
        assert_eq!(snapshot.branch(), Some("main"));
        assert!(snapshot.files().is_empty());
        assert!(snapshot.error().is_none());
        assert_eq!(snapshot.repository_id.path(), repo.as_path());
    }

    #[tokio::test]
    async fn test_not_a_repository() {
        let (_tmp, repo, oracle) = setup();
        let snapshot = computer(&oracle).compute(&repo).await;
        assert_eq!(snapshot.error(), Some(NOT_A_REPOSITORY));
        assert!(snapshot.files().is_empty());
    }

    #[tokio::test]
    async fn test_oracle_unavailable_is_repository_error() {
        let (_tmp, repo, oracle) = setup();
        oracle.set_status(&repo, RepoStatus::clean("main"));
        oracle.set_unavailable(true);

        let snapshot = computer(&oracle).compute(&repo).await;
        assert!(snapshot.error().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_untracked_file_is_fully_added() {
        let (_tmp, repo, oracle) = setup();
        fs::write(repo.join("a.txt"), "line one\nline two\nline three\n").unwrap();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                untracked: vec!["a.txt".to_string()],
                ..RepoStatus::default()
            },
        );

        let snapshot = computer(&oracle).compute(&repo).await;
        assert_eq!(snapshot.files().len(), 1);
        let change = &snapshot.files()[0];
        assert_eq!(change.relative_path, "a.txt");
        assert_eq!(change.classification, ChangeKind::Added);
        assert!(!change.is_degraded());
        assert_eq!(change.stats().additions, 3);
        assert_eq!(change.stats().deletions, 0);
    }

    #[tokio::test]
    async fn test_binary_and_unreadable_files_degrade_individually() {
        let (_tmp, repo, oracle) = setup();
        fs::write(repo.join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0, 1]).unwrap();
        fs::create_dir(repo.join("nested")).unwrap();
        fs::write(repo.join("ok.txt"), "fine\n").unwrap();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                untracked: vec![
                    "logo.png".to_string(),
                    "nested".to_string(),
                    "ok.txt".to_string(),
                    "vanished.txt".to_string(),
                ],
                ..RepoStatus::default()
            },
        );

        let snapshot = computer(&oracle).compute(&repo).await;
        let files = snapshot.files();
        assert_eq!(files.len(), 4);

        let by_path = |p: &str| files.iter().find(|f| f.relative_path == p).unwrap();
        let logo = by_path("logo.png");
        assert!(logo.is_degraded());
        assert!(logo.diff_text.contains("<Binary file: logo.png>"));
        assert!(by_path("nested").diff_text.contains("<Directory: nested>"));
        assert!(by_path("vanished.txt").is_degraded());
        assert!(!by_path("vanished.txt").diff_text.is_empty());

        let ok = by_path("ok.txt");
        assert!(!ok.is_degraded());
        assert_eq!(ok.stats().additions, 1);
    }

    #[tokio::test]
    async fn test_modified_file_uses_oracle_diff() {
        let (_tmp, repo, oracle) = setup();
        fs::write(repo.join("lib.rs"), "new\n").unwrap();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                modified: vec!["lib.rs".to_string()],
                ..RepoStatus::default()
            },
        );
        oracle.set_diff(
            &repo,
            "lib.rs",
            "diff --git a/lib.rs b/lib.rs\n--- a/lib.rs\n+++ b/lib.rs\n@@ -1 +1 @@\n-old\n+new\n",
        );

        let snapshot = computer(&oracle).compute(&repo).await;
        let change = &snapshot.files()[0];
        assert_eq!(change.classification, ChangeKind::Modified);
        assert!(!change.is_degraded());
        assert_eq!(change.stats().additions, 1);
        assert_eq!(change.stats().deletions, 1);
    }

    #[tokio::test]
    async fn test_modified_file_diff_failure_degrades() {
        let (_tmp, repo, oracle) = setup();
        fs::write(repo.join("blob.bin"), "x").unwrap();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                modified: vec!["blob.bin".to_string()],
                ..RepoStatus::default()
            },
        );
        oracle.fail_diff(
            &repo,
            "blob.bin",
            OracleError::Timeout {
                command: "git diff".to_string(),
                after: Duration::from_secs(10),
            },
        );

        let snapshot = computer(&oracle).compute(&repo).await;
        let change = &snapshot.files()[0];
        assert!(change.diff_text.contains("<File modified: blob.bin>"));
        assert!(change.failure_reason.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_deleted_file() {
        let (_tmp, repo, oracle) = setup();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                deleted: vec!["gone.rs".to_string(), "gone_too.rs".to_string()],
                ..RepoStatus::default()
            },
        );
        oracle.set_diff(&repo, "gone.rs", "--- a/gone.rs\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n");

        let snapshot = computer(&oracle).compute(&repo).await;
        let files = snapshot.files();
        assert_eq!(files[0].relative_path, "gone.rs");
        assert_eq!(files[0].classification, ChangeKind::Deleted);
        assert_eq!(files[0].stats().deletions, 2);
        assert_eq!(files[1].classification, ChangeKind::Deleted);
        assert!(files[1].diff_text.contains("<File deleted: gone_too.rs>"));
    }

    #[tokio::test]
    async fn test_modified_then_deleted_uses_oracle_diff() {
        let (_tmp, repo, oracle) = setup();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                modified: vec!["staged.rs".to_string(), "lost.rs".to_string()],
                deleted: vec!["staged.rs".to_string(), "lost.rs".to_string()],
                ..RepoStatus::default()
            },
        );
        oracle.set_diff(&repo, "staged.rs", "--- a/staged.rs\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n");

        let snapshot = computer(&oracle).compute(&repo).await;
        let files = snapshot.files();
        assert_eq!(files[0].relative_path, "lost.rs");
        assert_eq!(files[0].classification, ChangeKind::Modified);
        assert_eq!(
            files[0].failure_reason.as_deref(),
            Some("file reported as modified but not found")
        );
        assert_eq!(files[1].relative_path, "staged.rs");
        assert_eq!(files[1].classification, ChangeKind::Modified);
        assert!(!files[1].is_degraded());
        assert_eq!(files[1].stats().deletions, 1);
    }

    #[tokio::test]
    async fn test_path_in_several_sets_appears_once() {
        let (_tmp, repo, oracle) = setup();
        fs::write(repo.join("dup.rs"), "one\n").unwrap();
        oracle.set_status(
            &repo,
            RepoStatus {
                branch: "main".to_string(),
                modified: vec!["dup.rs".to_string()],
                created: vec!["dup.rs".to_string()],
                ..RepoStatus::default()
            },
        );

        let snapshot = computer(&oracle).compute(&repo).await;
        assert_eq!(snapshot.files().len(), 1);
        assert_eq!(snapshot.files()[0].classification, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_single_flight_per_repository() {
        let (_tmp, repo, oracle) = setup();
        oracle.set_status(&repo, RepoStatus::clean("main"));
        oracle.set_latency(Duration::from_millis(30));
        let computer = computer(&oracle);

        let (a, b, c) = tokio::join!(
            computer.compute(&repo),
            computer.compute(&repo),
            computer.compute(&repo)
        );
        assert!(a.error().is_none() && b.error().is_none() && c.error().is_none());
        assert_eq!(oracle.status_calls(), 3);
        assert_eq!(oracle.max_concurrent_status(), 1);
    }
}
