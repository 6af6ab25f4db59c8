//! Data models shared by the status computer, watch sessions and registry.
//!
//! This module defines:
//! - Repository identity and registry records
//! - Per-file change classification
//! - Snapshots delivered to subscribers

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::{self, DiffStats};

/// Repository identity: the canonical filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(PathBuf);

impl RepoId {
    /// Wrap an already-canonical path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The canonical path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Final path component, used as the display name.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.0.file_name().map_or_else(
            || self.0.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Lifecycle state of a repository's watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchState {
    Stopped,
    Starting,
    Active,
    Error,
}

/// Classification of a changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Rank used when a path shows up in several status sets.
    /// Higher wins: created beats modified beats deleted.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Added => 2,
            Self::Modified => 1,
            Self::Deleted => 0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// One changed file inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path relative to the repository root.
    pub relative_path: String,

    pub classification: ChangeKind,

    /// Unified diff text. Never empty; a diff-shaped placeholder when the
    /// real diff could not be produced.
    pub diff_text: String,

    /// Set when `diff_text` is a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl FileChange {
    /// Create a change carrying a real diff.
    pub fn new(
        relative_path: impl Into<String>,
        classification: ChangeKind,
        diff_text: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            classification,
            diff_text: diff_text.into(),
            failure_reason: None,
        }
    }

    /// Create a change whose diff is a synthesized placeholder.
    pub fn degraded(
        relative_path: impl Into<String>,
        classification: ChangeKind,
        placeholder: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            classification,
            diff_text: placeholder.into(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Whether `diff_text` is a placeholder rather than real content.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.failure_reason.is_some()
    }

    /// Added/removed line counts of this file's diff.
    #[must_use]
    pub fn stats(&self) -> DiffStats {
        diff::parse(&self.diff_text).map(|parsed| parsed.stats).unwrap_or_default()
    }
}

/// Outcome part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotState {
    /// Working-tree changes as seen by the oracle.
    Ready { branch: String, files: Vec<FileChange> },
    /// Repository-level failure.
    Failed { error: String },
}

/// Complete change state of one repository at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub repository_id: RepoId,
    pub computed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: SnapshotState,
}

impl Snapshot {
    /// Build a successful snapshot stamped with the current time.
    #[must_use]
    pub fn ready(repository_id: RepoId, branch: impl Into<String>, files: Vec<FileChange>) -> Self {
        Self {
            repository_id,
            computed_at: Utc::now(),
            state: SnapshotState::Ready {
                branch: branch.into(),
                files,
            },
        }
    }

    /// Build a repository-level error snapshot.
    #[must_use]
    pub fn failed(repository_id: RepoId, error: impl Into<String>) -> Self {
        Self {
            repository_id,
            computed_at: Utc::now(),
            state: SnapshotState::Failed {
                error: error.into(),
            },
        }
    }

    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        match &self.state {
            SnapshotState::Ready { branch, .. } => Some(branch),
            SnapshotState::Failed { .. } => None,
        }
    }

    /// Changed files; empty for error snapshots.
    #[must_use]
    pub fn files(&self) -> &[FileChange] {
        match &self.state {
            SnapshotState::Ready { files, .. } => files,
            SnapshotState::Failed { .. } => &[],
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            SnapshotState::Ready { .. } => None,
            SnapshotState::Failed { error } => Some(error),
        }
    }

    /// Sum of every file's diff stats. Each file is parsed on its own, so a
    /// malformed diff only contributes zero.
    #[must_use]
    pub fn stats(&self) -> DiffStats {
        self.files()
            .iter()
            .map(FileChange::stats)
            .fold(DiffStats::default(), |acc, s| acc + s)
    }
}

/// A registered repository and its cached state.
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: RepoId,
    pub display_name: String,
    pub branch: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_snapshot: Option<Snapshot>,
    pub aggregate_stats: DiffStats,
    pub watch_state: WatchState,
}

impl Repository {
    /// Create a freshly registered repository.
    #[must_use]
    pub fn new(id: RepoId, registered_at: DateTime<Utc>) -> Self {
        Self {
            display_name: id.display_name(),
            id,
            branch: None,
            registered_at,
            last_snapshot: None,
            aggregate_stats: DiffStats::default(),
            watch_state: WatchState::Stopped,
        }
    }

    /// Fold a newly delivered snapshot into the cached fields.
    ///
    /// Error snapshots keep the last known branch.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if let Some(branch) = snapshot.branch() {
            self.branch = Some(branch.to_string());
        }
        self.aggregate_stats = snapshot.stats();
        self.last_snapshot = Some(snapshot);
    }

    /// Summary view handed to the display layer.
    #[must_use]
    pub fn summary(&self, is_current: bool) -> RepoSummary {
        RepoSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            branch: self.branch.clone(),
            changed_files: self.last_snapshot.as_ref().map_or(0, |s| s.files().len()),
            additions: self.aggregate_stats.additions,
            deletions: self.aggregate_stats.deletions,
            watch_state: self.watch_state,
            is_current,
            registered_at: self.registered_at,
        }
    }
}

/// Registry listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub id: RepoId,
    pub display_name: String,
    pub branch: Option<String>,
    pub changed_files: usize,
    pub additions: usize,
    pub deletions: usize,
    pub watch_state: WatchState,
    pub is_current: bool,
    pub registered_at: DateTime<Utc>,
}
