//! Watch session for a single repository.
//!
//! A session owns two subscriptions, one for working-tree content and one
//! for version-control metadata, plus a driver task that debounces their
//! events and runs the [`StatusComputer`]. Snapshots go to a sink supplied
//! at start.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::debounce::{sleep_until_opt, Debouncer};
use super::events::{EventSource, WatchSignal};
use super::filter::{find_git_dir, PathFilter};
use super::notifier::{ChangeNotifier, SubscribeRequest, Subscription, WatchRoot};
use crate::config::SessionConfig;
use crate::error::WatcherError;
use crate::git::StatusComputer;
use crate::models::{RepoId, Snapshot, WatchState};
use crate::observability::spans;
use crate::{Error, Result};

/// What a session reports to its owner.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A computation finished while the session was active.
    Snapshot(Snapshot),
    /// The session stopped watching after an unrecoverable failure.
    Failed {
        repository_id: RepoId,
        error: WatcherError,
    },
}

enum Control {
    Refresh,
}

struct Running {
    subscriptions: Vec<Box<dyn Subscription>>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Watches one repository and delivers debounced snapshots.
pub struct WatchSession {
    repo: RepoId,
    computer: Arc<StatusComputer>,
    notifier: Arc<dyn ChangeNotifier>,
    config: SessionConfig,
    state: Arc<Mutex<WatchState>>,
    running: Option<Running>,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("repo", &self.repo)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WatchSession {
    pub fn new(
        repo: RepoId,
        computer: Arc<StatusComputer>,
        notifier: Arc<dyn ChangeNotifier>,
        config: SessionConfig,
    ) -> Self {
        Self {
            repo,
            computer,
            notifier,
            config,
            state: Arc::new(Mutex::new(WatchState::Stopped)),
            running: None,
        }
    }

    #[must_use]
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    #[must_use]
    pub fn state(&self) -> WatchState {
        *self.state.lock()
    }

    /// Subscribe to both event streams and start delivering snapshots to
    /// `sink`, beginning with an immediate one.
    ///
    /// Starting an active session does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the session already failed, if no Tokio runtime
    /// is running, or if either subscription cannot be established. In the
    /// last case the session moves to [`WatchState::Error`].
    pub fn start(&mut self, sink: mpsc::UnboundedSender<SessionUpdate>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                WatchState::Active | WatchState::Starting => return Ok(()),
                WatchState::Error => {
                    return Err(Error::internal(format!(
                        "watch session for {} has failed and cannot be restarted",
                        self.repo
                    )))
                }
                WatchState::Stopped => *state = WatchState::Starting,
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                *self.state.lock() = WatchState::Stopped;
                return Err(Error::internal(format!("no async runtime: {e}")));
            }
        };

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let subscriptions = match self.subscribe_all(&signal_tx) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                tracing::error!(repo = %self.repo, error = %e, "Failed to start watching");
                *self.state.lock() = WatchState::Error;
                return Err(e);
            }
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let driver = Driver {
            repo: self.repo.clone(),
            computer: Arc::clone(&self.computer),
            content_window: self.config.content_debounce,
            metadata_window: self.config.metadata_debounce,
            state: Arc::clone(&self.state),
            sink,
            _signal_tx: signal_tx,
        };

        *self.state.lock() = WatchState::Active;
        let span = spans::session_span(self.repo.path());
        let task = runtime.spawn(
            driver
                .run(signal_rx, control_rx, cancel.clone())
                .instrument(span),
        );

        self.running = Some(Running {
            subscriptions,
            control: control_tx,
            cancel,
            task,
        });
        tracing::info!(repo = %self.repo, "Watch session started");
        Ok(())
    }

    /// Stop watching. Idempotent.
    ///
    /// Subscriptions are closed first. Once this returns no further
    /// snapshot is delivered, including one already being computed.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        for subscription in &mut running.subscriptions {
            subscription.close();
        }
        {
            let mut state = self.state.lock();
            if *state != WatchState::Error {
                *state = WatchState::Stopped;
            }
        }
        running.cancel.cancel();
        running.task.abort();

        tracing::info!(repo = %self.repo, "Watch session stopped");
    }

    /// Ask for an immediate snapshot. Returns `false` if the session is not
    /// running.
    pub fn refresh(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.control.send(Control::Refresh).is_ok())
    }

    fn subscribe_all(
        &self,
        signals: &mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Vec<Box<dyn Subscription>>> {
        let root = self.repo.path();
        let mut subscriptions = Vec::with_capacity(2);

        let content = SubscribeRequest {
            source: EventSource::Content,
            roots: vec![WatchRoot::recursive(root)],
            filter: PathFilter::for_content(root, &self.config.extra_ignores)?,
            stabilization: self.config.stabilization_delay,
        };
        subscriptions.push(self.notifier.subscribe(content, signals.clone())?);

        match find_git_dir(root) {
            Some(git_dir) => {
                let mut roots = vec![WatchRoot::shallow(&git_dir)];
                let refs = git_dir.join("refs");
                if refs.is_dir() {
                    roots.push(WatchRoot::recursive(refs));
                }
                let metadata = SubscribeRequest {
                    source: EventSource::Metadata,
                    roots,
                    filter: PathFilter::for_metadata(&git_dir)?,
                    stabilization: Duration::ZERO,
                };
                // On failure the content subscription is dropped, which closes it.
                subscriptions.push(self.notifier.subscribe(metadata, signals.clone())?);
            }
            None => {
                tracing::warn!(repo = %self.repo, "No git directory found; metadata changes will not be watched");
            }
        }

        Ok(subscriptions)
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the session's background task.
struct Driver {
    repo: RepoId,
    computer: Arc<StatusComputer>,
    content_window: Duration,
    metadata_window: Duration,
    state: Arc<Mutex<WatchState>>,
    sink: mpsc::UnboundedSender<SessionUpdate>,
    // Keeps the signal channel open after every subscription is closed.
    _signal_tx: mpsc::UnboundedSender<WatchSignal>,
}

impl Driver {
    async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<WatchSignal>,
        mut control: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) {
        let mut debouncer = Debouncer::new();
        let mut computing: Option<BoxFuture<'static, Snapshot>> = None;

        if debouncer.request_now(Instant::now()) {
            computing = Some(self.compute());
        }

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                Some(signal) = signals.recv() => match signal {
                    WatchSignal::Event(event) => {
                        tracing::debug!(source = ?event.source, kind = ?event.kind, path = %event.path.display(), "Change event");
                        let window = match event.source {
                            EventSource::Content => self.content_window,
                            EventSource::Metadata => self.metadata_window,
                        };
                        debouncer.on_event(window, Instant::now());
                    }
                    WatchSignal::Failed(error) => {
                        self.fail(error);
                        break;
                    }
                },

                Some(Control::Refresh) = control.recv() => {
                    if debouncer.request_now(Instant::now()) {
                        computing = Some(self.compute());
                    }
                }

                () = sleep_until_opt(deadline) => {
                    if debouncer.on_timer(Instant::now()) {
                        computing = Some(self.compute());
                    }
                }

                snapshot = next_snapshot(&mut computing) => {
                    computing = None;
                    debouncer.on_computed(Instant::now());
                    if !self.deliver(snapshot) {
                        break;
                    }
                }
            }
        }
    }

    fn compute(&self) -> BoxFuture<'static, Snapshot> {
        let computer = Arc::clone(&self.computer);
        let repo = self.repo.clone();
        async move { computer.compute(repo.path()).await }.boxed()
    }

    /// Hand a snapshot to the sink. Returns `false` once the session should
    /// shut down.
    fn deliver(&self, snapshot: Snapshot) -> bool {
        let state = self.state.lock();
        if *state != WatchState::Active {
            tracing::debug!(repo = %self.repo, "Discarding snapshot for inactive session");
            return false;
        }
        tracing::debug!(
            repo = %self.repo,
            files = snapshot.files().len(),
            error = snapshot.error().unwrap_or_default(),
            "Delivering snapshot"
        );
        self.sink.send(SessionUpdate::Snapshot(snapshot)).is_ok()
    }

    fn fail(&self, error: WatcherError) {
        let mut state = self.state.lock();
        if *state != WatchState::Active {
            return;
        }
        *state = WatchState::Error;
        tracing::error!(repo = %self.repo, error = %error, "Watch session failed");
        let _ = self.sink.send(SessionUpdate::Failed {
            repository_id: self.repo.clone(),
            error,
        });
    }
}

async fn next_snapshot(computing: &mut Option<BoxFuture<'static, Snapshot>>) -> Snapshot {
    match computing {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
