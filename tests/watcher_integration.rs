//! Integration tests against a real `git` binary and real file notifications.
//!
//! Each test returns early when `git` is not installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use repomon::config::SessionConfig;
use repomon::git::{GitCli, StatusComputer, NOT_A_REPOSITORY};
use repomon::models::{ChangeKind, RepoId, Snapshot};
use repomon::registry::{RegistryEvent, RepoRegistry, Subscription};
use repomon::storage::MemoryStore;
use repomon::watcher::{NotifyBackend, SessionUpdate, WatchSession};
use repomon::Error;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.email=dev@example.com", "-c", "user.name=Dev"])
        .args(["-c", "commit.gpgsign=false"])
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

/// Repository on branch `main` with one commit.
fn init_repo(tmp: &TempDir) -> PathBuf {
    fs::create_dir_all(tmp.path().join("app")).unwrap();
    let repo = tmp.path().join("app").canonicalize().unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(repo.join("lib.rs"), "a\nb\nc\n").unwrap();
    fs::write(repo.join("old.txt"), "gone\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "init"]);
    repo
}

fn computer() -> Arc<StatusComputer> {
    Arc::new(StatusComputer::new(Arc::new(GitCli::new(
        "git",
        Duration::from_secs(10),
    ))))
}

async fn next_snapshot<F>(sub: &mut Subscription, mut pred: F) -> Snapshot
where
    F: FnMut(&Snapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let event = tokio::time::timeout_at(deadline, sub.recv())
            .await
            .expect("timed out waiting for snapshot")
            .expect("registry closed");
        if let RegistryEvent::Snapshot { snapshot, .. } = event {
            if pred(&snapshot) {
                return snapshot;
            }
        }
    }
}

#[tokio::test]
async fn test_compute_classifies_working_tree() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(&tmp);

    fs::write(repo.join("lib.rs"), "a\nB\nc\nd\n").unwrap();
    fs::remove_file(repo.join("old.txt")).unwrap();
    fs::write(repo.join("new.txt"), "x\ny\n").unwrap();

    let snapshot = computer().compute(&repo).await;
    assert_eq!(snapshot.error(), None);
    assert_eq!(snapshot.branch(), Some("main"));

    let files: Vec<(&str, ChangeKind)> = snapshot
        .files()
        .iter()
        .map(|f| (f.relative_path.as_str(), f.classification))
        .collect();
    assert_eq!(
        files,
        vec![
            ("lib.rs", ChangeKind::Modified),
            ("new.txt", ChangeKind::Added),
            ("old.txt", ChangeKind::Deleted),
        ]
    );

    let lib = &snapshot.files()[0];
    assert!(!lib.is_degraded());
    let parsed = repomon::diff::parse(&lib.diff_text).unwrap();
    assert_eq!((parsed.stats.additions, parsed.stats.deletions), (2, 1));
    assert_eq!(parsed.first_changed_line, Some(2));

    let stats = snapshot.stats();
    assert_eq!((stats.additions, stats.deletions), (4, 2));
}

#[tokio::test]
async fn test_compute_outside_repository() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let snapshot = computer().compute(tmp.path()).await;
    assert_eq!(snapshot.error(), Some(NOT_A_REPOSITORY));
}

#[tokio::test]
async fn test_registry_rejects_plain_directory() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let registry = RepoRegistry::new(
        computer(),
        Arc::new(NotifyBackend::new()),
        Arc::new(MemoryStore::new()),
        SessionConfig::default(),
    )
    .unwrap();

    let err = registry.add_repository(tmp.path()).await.unwrap_err();
    assert!(matches!(err, Error::NotAGitRepository(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edits_and_commits_are_pushed() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(&tmp);

    let config = SessionConfig {
        content_debounce: Duration::from_millis(150),
        metadata_debounce: Duration::from_millis(250),
        stabilization_delay: Duration::from_millis(50),
        extra_ignores: Vec::new(),
    };
    let registry = RepoRegistry::new(
        computer(),
        Arc::new(NotifyBackend::new()),
        Arc::new(MemoryStore::new()),
        config,
    )
    .unwrap();
    let mut sub = registry.subscribe();

    let id = registry.add_repository(&repo).await.unwrap();
    let initial = next_snapshot(&mut sub, |_| true).await;
    assert_eq!(initial.repository_id, id);
    assert!(initial.files().is_empty());

    fs::write(repo.join("notes.md"), "one\ntwo\nthree\n").unwrap();
    let edited = next_snapshot(&mut sub, |s| !s.files().is_empty()).await;
    assert_eq!(edited.files()[0].relative_path, "notes.md");
    assert_eq!(edited.stats().additions, 3);

    // A commit touches only .git; the empty snapshot must still arrive.
    git(&repo, &["add", "notes.md"]);
    git(&repo, &["commit", "-q", "-m", "notes"]);
    let committed = next_snapshot(&mut sub, |s| s.files().is_empty()).await;
    assert_eq!(committed.branch(), Some("main"));

    let summary = &registry.list().await[0];
    assert_eq!(summary.changed_files, 0);
    assert!(summary.is_current);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_registry_resolves_subdirectory_to_root() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(&tmp);
    fs::create_dir_all(repo.join("sub")).unwrap();
    fs::write(repo.join("sub/x.txt"), "x\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "sub"]);
    fs::write(repo.join("sub/x.txt"), "x\ny\n").unwrap();
    fs::write(repo.join("sub/n.txt"), "n\n").unwrap();

    let registry = RepoRegistry::new(
        computer(),
        Arc::new(NotifyBackend::new()),
        Arc::new(MemoryStore::new()),
        SessionConfig::default(),
    )
    .unwrap();
    let mut sub = registry.subscribe();

    let id = registry.add_repository(repo.join("sub")).await.unwrap();
    assert_eq!(id.path(), repo.as_path());
    let err = registry.add_repository(&repo).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(_)));
    assert_eq!(registry.list().await.len(), 1);

    let snapshot = next_snapshot(&mut sub, |s| s.files().len() == 2).await;
    let files: Vec<(&str, ChangeKind, bool)> = snapshot
        .files()
        .iter()
        .map(|f| (f.relative_path.as_str(), f.classification, f.is_degraded()))
        .collect();
    assert_eq!(
        files,
        vec![
            ("sub/n.txt", ChangeKind::Added, false),
            ("sub/x.txt", ChangeKind::Modified, false),
        ]
    );

    registry.shutdown().await;
}

async fn recv_snapshot(
    rx: &mut mpsc::UnboundedReceiver<SessionUpdate>,
    within: Duration,
) -> Option<Snapshot> {
    match tokio::time::timeout(within, rx.recv()).await {
        Ok(Some(SessionUpdate::Snapshot(snapshot))) => Some(snapshot),
        Ok(other) => panic!("unexpected update: {other:?}"),
        Err(_) => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rewrites_within_stabilization_give_one_snapshot() {
    if !git_available() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let repo = init_repo(&tmp);

    let config = SessionConfig {
        content_debounce: Duration::from_millis(300),
        metadata_debounce: Duration::from_millis(400),
        stabilization_delay: Duration::from_millis(400),
        extra_ignores: Vec::new(),
    };
    let mut session = WatchSession::new(
        RepoId::new(&repo),
        computer(),
        Arc::new(NotifyBackend::new()),
        config,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.start(tx).unwrap();

    let initial = recv_snapshot(&mut rx, Duration::from_secs(20)).await.unwrap();
    assert!(initial.files().is_empty());

    fs::write(repo.join("draft.md"), "one\n").unwrap();
    fs::write(repo.join("draft.md"), "one\ntwo\nthree\n").unwrap();

    let settled = recv_snapshot(&mut rx, Duration::from_secs(20)).await.unwrap();
    assert_eq!(settled.files().len(), 1);
    assert_eq!(settled.files()[0].relative_path, "draft.md");
    assert_eq!(settled.stats().additions, 3);

    assert!(recv_snapshot(&mut rx, Duration::from_millis(1500)).await.is_none());
    session.stop();
}
