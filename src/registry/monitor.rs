//! The repository registry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::events::{RegistryEvent, Subscription};
use crate::config::SessionConfig;
use crate::git::StatusComputer;
use crate::models::{RepoId, RepoSummary, Repository, Snapshot, WatchState};
use crate::storage::{KeyValueStore, KeyValueStoreExt};
use crate::watcher::{ChangeNotifier, SessionUpdate, WatchSession};
use crate::{Error, Result};

/// Store key of the registered repositories, in registration order.
pub const REPOSITORIES_KEY: &str = "repositories";
/// Store key of the current selection.
pub const CURRENT_KEY: &str = "currentRepository";
/// Store key of the most-recently-added list.
pub const RECENT_KEY: &str = "recentRepositories";

/// Entries kept in the recent list.
pub const MAX_RECENT: usize = 20;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRepository {
    path: PathBuf,
    registered_at: DateTime<Utc>,
}

/// An entry of the recent-repositories list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentRepository {
    pub path: PathBuf,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    repo: Repository,
    session: WatchSession,
}

impl Entry {
    fn summary(&self, is_current: bool) -> RepoSummary {
        let mut summary = self.repo.summary(is_current);
        summary.watch_state = self.session.state();
        summary
    }
}

#[derive(Default)]
struct State {
    /// Registration order.
    entries: Vec<Entry>,
    current: Option<RepoId>,
    shut_down: bool,
}

impl State {
    fn position(&self, id: &RepoId) -> Option<usize> {
        self.entries.iter().position(|e| &e.repo.id == id)
    }

    fn entry_mut(&mut self, id: &RepoId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| &e.repo.id == id)
    }

    fn is_current(&self, id: &RepoId) -> bool {
        self.current.as_ref() == Some(id)
    }

    fn summaries(&self) -> Vec<RepoSummary> {
        self.entries
            .iter()
            .map(|e| e.summary(self.is_current(&e.repo.id)))
            .collect()
    }

    fn persisted(&self) -> Vec<PersistedRepository> {
        self.entries
            .iter()
            .map(|e| PersistedRepository {
                path: e.repo.id.path().to_path_buf(),
                registered_at: e.repo.registered_at,
            })
            .collect()
    }
}

struct Inner {
    computer: Arc<StatusComputer>,
    notifier: Arc<dyn ChangeNotifier>,
    store: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    state: Mutex<State>,
    events: RwLock<Option<broadcast::Sender<RegistryEvent>>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

/// Owns every registered repository, its watch session and the current
/// selection.
///
/// Mutations are serialized by one lock around the registry state. Changes
/// are published to [`Subscription`]s and persisted to the key-value store.
pub struct RepoRegistry {
    inner: Arc<Inner>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RepoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoRegistry").finish_non_exhaustive()
    }
}

impl RepoRegistry {
    /// Create an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a Tokio runtime.
    pub fn new(
        computer: Arc<StatusComputer>,
        notifier: Arc<dyn ChangeNotifier>,
        store: Arc<dyn KeyValueStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("no async runtime: {e}")))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            computer,
            notifier,
            store,
            config,
            state: Mutex::new(State::default()),
            events: RwLock::new(Some(events)),
            updates,
        });

        let pump = runtime.spawn(pump(Arc::downgrade(&inner), updates_rx));

        Ok(Self {
            inner,
            pump: parking_lot::Mutex::new(Some(pump)),
        })
    }

    /// Register the repository containing `path` and start watching it.
    ///
    /// A path inside a working tree registers the tree's root.
    ///
    /// The first repository registered while nothing is selected becomes
    /// current.
    ///
    /// # Errors
    ///
    /// - [`Error::PathNotFound`] if `path` does not exist
    /// - [`Error::AlreadyRegistered`] if its canonical path is registered
    /// - [`Error::NotAGitRepository`] if the oracle rejects it
    /// - [`Error::OracleCommandFailed`] if the oracle cannot answer
    pub async fn add_repository(&self, path: impl AsRef<Path>) -> Result<RepoId> {
        let canonical = canonicalize(path.as_ref()).await?;

        let mut state = self.inner.state.lock().await;
        self.inner.ensure_running(&state)?;

        let id = self
            .inner
            .register(&mut state, canonical, Utc::now())
            .await?;
        self.inner.persist_repositories(&state);
        self.inner.push_recent(&id);

        if state.current.is_none() {
            self.inner.select(&mut state, &id);
        }
        self.inner.emit_repositories(&state);

        tracing::info!(repo = %id, "Repository added");
        Ok(id)
    }

    /// Stop watching and deregister `id`.
    ///
    /// Removing the current repository selects the most recently registered
    /// remaining one, or publishes [`RegistryEvent::NoRepositorySelected`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryNotRegistered`] if `id` is unknown.
    pub async fn remove_repository(&self, id: &RepoId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.ensure_running(&state)?;

        let index = state
            .position(id)
            .ok_or_else(|| Error::RepositoryNotRegistered(id.clone()))?;
        let mut entry = state.entries.remove(index);
        entry.session.stop();
        self.inner.computer.forget(id.path());
        self.inner.persist_repositories(&state);

        if state.is_current(id) {
            match state.entries.last().map(|e| e.repo.id.clone()) {
                Some(next) => self.inner.select(&mut state, &next),
                None => {
                    state.current = None;
                    self.inner.persist_current(None);
                    self.inner.emit(RegistryEvent::NoRepositorySelected);
                    tracing::info!("No repository selected");
                }
            }
        }
        self.inner.emit_repositories(&state);

        tracing::info!(repo = %id, "Repository removed");
        Ok(())
    }

    /// Make `id` the current repository and request a fresh snapshot of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryNotRegistered`] if `id` is unknown.
    pub async fn select_current(&self, id: &RepoId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.inner.ensure_running(&state)?;
        if state.position(id).is_none() {
            return Err(Error::RepositoryNotRegistered(id.clone()));
        }

        self.inner.select(&mut state, id);
        self.inner.emit_repositories(&state);
        Ok(())
    }

    /// Last delivered snapshot of `id`, computing one if none has arrived yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryNotRegistered`] if `id` is unknown.
    pub async fn get_snapshot(&self, id: &RepoId) -> Result<Snapshot> {
        {
            let state = self.inner.state.lock().await;
            let index = state
                .position(id)
                .ok_or_else(|| Error::RepositoryNotRegistered(id.clone()))?;
            if let Some(snapshot) = &state.entries[index].repo.last_snapshot {
                return Ok(snapshot.clone());
            }
        }
        Ok(self.inner.computer.compute(id.path()).await)
    }

    /// Every registered repository in registration order.
    pub async fn list(&self) -> Vec<RepoSummary> {
        self.inner.state.lock().await.summaries()
    }

    /// The current selection.
    pub async fn current(&self) -> Option<RepoId> {
        self.inner.state.lock().await.current.clone()
    }

    /// Recently added repositories, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list cannot be read.
    pub fn recent(&self) -> Result<Vec<RecentRepository>> {
        self.inner.store.get_or(RECENT_KEY, Vec::new())
    }

    /// Re-register the persisted repositories and selection.
    ///
    /// Repositories that can no longer be registered are logged and skipped.
    /// They stay in the store until the next registry change rewrites it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry has shut down.
    pub async fn restore(&self) -> Result<usize> {
        let persisted: Vec<PersistedRepository> =
            read_or_default(self.inner.store.as_ref(), REPOSITORIES_KEY);
        let saved_current: Option<PathBuf> = read_or_default(self.inner.store.as_ref(), CURRENT_KEY);

        let mut state = self.inner.state.lock().await;
        self.inner.ensure_running(&state)?;

        let mut restored = 0;
        for record in persisted {
            let result = match canonicalize(&record.path).await {
                Ok(canonical) => {
                    self.inner
                        .register(&mut state, canonical, record.registered_at)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => restored += 1,
                Err(Error::AlreadyRegistered(_)) => {}
                Err(e) => {
                    tracing::warn!(path = %record.path.display(), error = %e, "Skipping persisted repository");
                }
            }
        }

        let current = saved_current
            .map(RepoId::new)
            .filter(|id| state.position(id).is_some())
            .or_else(|| state.entries.last().map(|e| e.repo.id.clone()));
        match current {
            Some(id) => self.inner.select(&mut state, &id),
            None if state.current.is_none() => {
                self.inner.emit(RegistryEvent::NoRepositorySelected);
            }
            None => {}
        }
        self.inner.emit_repositories(&state);

        tracing::info!(restored, "Registry restored");
        Ok(restored)
    }

    /// Subscribe to registry events.
    ///
    /// After [`RepoRegistry::shutdown`] the subscription is already closed.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        match self.inner.events.read().as_ref() {
            Some(events) => Subscription::new(events.subscribe()),
            None => Subscription::new(broadcast::channel(1).1),
        }
    }

    /// Stop every watch session and close all subscriptions.
    ///
    /// Further mutations fail. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        for entry in &mut state.entries {
            entry.session.stop();
        }
        drop(state);

        self.inner.events.write().take();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        tracing::info!("Registry shut down");
    }
}

impl Drop for RepoRegistry {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

impl Inner {
    fn ensure_running(&self, state: &State) -> Result<()> {
        if state.shut_down {
            Err(Error::internal("registry has shut down"))
        } else {
            Ok(())
        }
    }

    /// Resolve `canonical` to its working-tree root, then start a session
    /// for and append that root.
    async fn register(
        &self,
        state: &mut State,
        canonical: PathBuf,
        registered_at: DateTime<Utc>,
    ) -> Result<RepoId> {
        if !canonical.is_dir() {
            return Err(Error::NotAGitRepository(canonical));
        }
        let Some(root) = self.computer.oracle().toplevel(&canonical).await? else {
            return Err(Error::NotAGitRepository(canonical));
        };
        let root = canonicalize(&root).await?;
        if root != canonical {
            tracing::debug!(path = %canonical.display(), root = %root.display(), "Resolved working-tree root");
        }

        let id = RepoId::new(&root);
        if state.position(&id).is_some() {
            return Err(Error::AlreadyRegistered(id));
        }

        let mut session = WatchSession::new(
            id.clone(),
            Arc::clone(&self.computer),
            Arc::clone(&self.notifier),
            self.config.clone(),
        );
        session.start(self.updates.clone())?;

        let mut repo = Repository::new(id.clone(), registered_at);
        repo.watch_state = session.state();
        state.entries.push(Entry { repo, session });
        Ok(id)
    }

    fn select(&self, state: &mut State, id: &RepoId) {
        state.current = Some(id.clone());
        self.persist_current(Some(id));
        self.emit(RegistryEvent::CurrentSelected {
            repository_id: id.clone(),
        });

        if let Some(entry) = state.entry_mut(id) {
            if !entry.session.refresh() {
                // The session is not running; compute once on its behalf.
                let computer = Arc::clone(&self.computer);
                let updates = self.updates.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    let snapshot = computer.compute(id.path()).await;
                    let _ = updates.send(SessionUpdate::Snapshot(snapshot));
                });
            }
        }
        tracing::info!(repo = %id, "Current repository selected");
    }

    async fn apply_update(&self, update: SessionUpdate) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }

        match update {
            SessionUpdate::Snapshot(snapshot) => {
                let id = snapshot.repository_id.clone();
                let is_current = state.is_current(&id);
                let Some(entry) = state.entry_mut(&id) else {
                    tracing::debug!(repo = %id, "Dropping snapshot for unregistered repository");
                    return;
                };

                let before = entry.summary(is_current);
                entry.repo.watch_state = entry.session.state();
                entry.repo.apply_snapshot(snapshot.clone());
                let changed = entry.summary(is_current) != before;

                self.emit(RegistryEvent::Snapshot {
                    repository_id: id,
                    snapshot,
                });
                if changed {
                    self.emit_repositories(&state);
                }
            }
            SessionUpdate::Failed {
                repository_id,
                error,
            } => {
                let Some(entry) = state.entry_mut(&repository_id) else {
                    return;
                };
                // Error is terminal; release the remaining watches.
                entry.session.stop();
                entry.repo.watch_state = WatchState::Error;

                self.emit(RegistryEvent::WatchFailed {
                    repository_id,
                    error: error.to_string(),
                });
                self.emit_repositories(&state);
            }
        }
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(events) = self.events.read().as_ref() {
            // No receivers is not an error.
            let _ = events.send(event);
        }
    }

    fn emit_repositories(&self, state: &State) {
        self.emit(RegistryEvent::Repositories {
            registered: state.summaries(),
        });
    }

    fn persist_repositories(&self, state: &State) {
        if let Err(e) = self.store.put(REPOSITORIES_KEY, &state.persisted()) {
            tracing::warn!(error = %e, "Failed to persist repositories");
        }
    }

    fn persist_current(&self, id: Option<&RepoId>) {
        if let Err(e) = self.store.put(CURRENT_KEY, &id) {
            tracing::warn!(error = %e, "Failed to persist current repository");
        }
    }

    fn push_recent(&self, id: &RepoId) {
        let mut recent: Vec<RecentRepository> = read_or_default(self.store.as_ref(), RECENT_KEY);
        recent.retain(|r| r.path != id.path());
        recent.insert(
            0,
            RecentRepository {
                path: id.path().to_path_buf(),
                name: id.display_name(),
                timestamp: Utc::now(),
            },
        );
        recent.truncate(MAX_RECENT);

        if let Err(e) = self.store.put(RECENT_KEY, &recent) {
            tracing::warn!(error = %e, "Failed to persist recent repositories");
        }
    }
}

/// Forward session updates into the registry until it is dropped.
async fn pump(inner: Weak<Inner>, mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply_update(update).await;
    }
}

async fn canonicalize(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::PathNotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })
}

fn read_or_default<T: serde::de::DeserializeOwned + Default>(
    store: &dyn KeyValueStore,
    key: &str,
) -> T {
    store.get_or(key, T::default()).unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "Ignoring unreadable stored value");
        T::default()
    })
}
