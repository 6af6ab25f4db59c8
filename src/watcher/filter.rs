//! Noise filtering with gitignore-style globs.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::Result;

/// Working-tree paths that never trigger a refresh: version-control
/// metadata (watched separately), dependency/build/output directories,
/// OS litter and common binary formats.
const CONTENT_IGNORES: &[&str] = &[
    ".git/",
    "node_modules/",
    "build/",
    "dist/",
    "target/",
    "tmp/",
    "temp/",
    "._*",
    ".DS_Store",
    "Thumbs.db",
    "*.jpg",
    "*.jpeg",
    "*.png",
    "*.gif",
    "*.ico",
    "*.db",
    "*.sqlite",
    "*.mov",
    "*.mp4",
    "*.mp3",
    "*.zip",
    "*.tar",
    "*.gz",
    "*.tgz",
    "*.7z",
    "*.pdf",
    "*.dmg",
    "*.pkg",
    "*.woff",
    "*.ttf",
];

/// Metadata paths that never trigger a refresh: content-addressed object
/// storage, reflogs and transient lock files.
const METADATA_IGNORES: &[&str] = &["objects/", "logs/", "*.lock"];

/// Path filter rooted at a directory.
#[derive(Debug)]
pub struct PathFilter {
    root: PathBuf,
    matcher: Gitignore,
}

impl PathFilter {
    /// Create a filter from explicit patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is invalid.
    pub fn with_patterns(root: impl AsRef<Path>, patterns: &[&str]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut builder = GitignoreBuilder::new(&root);
        add_patterns(&mut builder, patterns.iter().copied())?;
        build(root, &builder)
    }

    /// Filter for the working-tree stream of a repository.
    ///
    /// Combines the built-in noise list, the repository's root `.gitignore`
    /// (when present) and `extra` patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if an extra pattern is invalid.
    pub fn for_content(root: impl AsRef<Path>, extra: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut builder = GitignoreBuilder::new(&root);
        add_patterns(&mut builder, CONTENT_IGNORES.iter().copied())?;

        let gitignore = root.join(".gitignore");
        if gitignore.is_file() {
            if let Some(e) = builder.add(&gitignore) {
                tracing::warn!(path = %gitignore.display(), "Ignoring unreadable .gitignore: {e}");
            }
        }

        add_patterns(&mut builder, extra.iter().map(String::as_str))?;
        build(root, &builder)
    }

    /// Filter for the metadata stream, rooted at the git directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in patterns fail to compile.
    pub fn for_metadata(git_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_patterns(git_dir, METADATA_IGNORES)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` should be dropped. Paths outside the root are.
    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, path.is_dir())
            .is_ignore()
    }
}

fn add_patterns<'a>(
    builder: &mut GitignoreBuilder,
    patterns: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| crate::Error::config(format!("invalid ignore pattern '{pattern}': {e}")))?;
    }
    Ok(())
}

fn build(root: PathBuf, builder: &GitignoreBuilder) -> Result<PathFilter> {
    let matcher = builder
        .build()
        .map_err(|e| crate::Error::config(format!("failed to build ignore rules: {e}")))?;
    Ok(PathFilter { root, matcher })
}

/// Locate the git directory for a working tree, walking up from `repo`.
///
/// Handles `.git` files (`gitdir: <path>`) used by worktrees and submodules.
#[must_use]
pub fn find_git_dir(repo: &Path) -> Option<PathBuf> {
    for dir in repo.ancestors() {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Some(candidate);
        }
        if candidate.is_file() {
            let content = std::fs::read_to_string(&candidate).ok()?;
            let target = content.lines().find_map(|l| l.strip_prefix("gitdir:"))?.trim();
            let target = Path::new(target);
            return Some(if target.is_absolute() {
                target.to_path_buf()
            } else {
                dir.join(target)
            });
        }
    }
    None
}
