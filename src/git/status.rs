//! Working-tree status sets and `git status --porcelain=v1 -z` parsing.

use std::collections::BTreeMap;

use crate::error::OracleError;
use crate::models::ChangeKind;

/// Branch reported for a detached HEAD.
pub const DETACHED_BRANCH: &str = "HEAD";

/// Status sets reported by the oracle. A path may appear in several sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub branch: String,
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
}

impl RepoStatus {
    /// Status of a clean tree on `branch`.
    pub fn clean(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty()
            && self.created.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
    }

    /// One classification per path, sorted by path.
    ///
    /// Created and untracked paths are `Added`, and `Added` beats
    /// `Modified` beats `Deleted` when a path is in several sets.
    #[must_use]
    pub fn classify(&self) -> BTreeMap<String, ChangeKind> {
        let tagged = self
            .modified
            .iter()
            .map(|p| (p, ChangeKind::Modified))
            .chain(self.created.iter().map(|p| (p, ChangeKind::Added)))
            .chain(self.deleted.iter().map(|p| (p, ChangeKind::Deleted)))
            .chain(self.untracked.iter().map(|p| (p, ChangeKind::Added)));

        let mut classified: BTreeMap<String, ChangeKind> = BTreeMap::new();
        for (path, kind) in tagged {
            classified
                .entry(path.clone())
                .and_modify(|existing| {
                    if kind.precedence() > existing.precedence() {
                        *existing = kind;
                    }
                })
                .or_insert(kind);
        }
        classified
    }
}

/// Parse the output of `git status --porcelain=v1 --branch -z`.
///
/// # Errors
///
/// Returns an error if an entry is too short to carry a status code.
pub fn parse_porcelain(output: &str) -> Result<RepoStatus, OracleError> {
    let mut status = RepoStatus::default();
    let mut records = output.split('\0').filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if let Some(header) = record.strip_prefix("## ") {
            status.branch = parse_branch(header);
            continue;
        }

        let malformed = || OracleError::InvalidOutput(format!("malformed status entry '{record}'"));
        if record.len() < 4 || !record.is_char_boundary(2) {
            return Err(malformed());
        }
        let (code, path) = record.split_at(2);
        let path = path.get(1..).ok_or_else(malformed)?;
        let path = path.trim_end_matches('/').to_string();
        let mut flags = code.chars();
        let index = flags.next().unwrap_or(' ');
        let worktree = flags.next().unwrap_or(' ');

        match (index, worktree) {
            ('?', '?') => status.untracked.push(path),
            ('!', '!') => {}
            _ => {
                if index == 'R' || index == 'C' {
                    // Renamed/copied entries carry their source as the next record.
                    if let Some(source) = records.next() {
                        if index == 'R' {
                            status.deleted.push(source.to_string());
                        }
                    }
                    status.created.push(path.clone());
                }
                if index == 'A' {
                    status.created.push(path.clone());
                }
                if index == 'D' || worktree == 'D' {
                    status.deleted.push(path.clone());
                }
                if [index, worktree]
                    .iter()
                    .any(|c| matches!(c, 'M' | 'T' | 'U'))
                {
                    status.modified.push(path);
                }
            }
        }
    }

    Ok(status)
}

fn parse_branch(header: &str) -> String {
    for prefix in ["No commits yet on ", "Initial commit on "] {
        if let Some(branch) = header.strip_prefix(prefix) {
            return branch.trim().to_string();
        }
    }
    if header.starts_with("HEAD (no branch)") {
        return DETACHED_BRANCH.to_string();
    }
    let end = header
        .find("...")
        .or_else(|| header.find(' '))
        .unwrap_or(header.len());
    header[..end].to_string()
}
