//! Events pushed to registry subscribers.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::models::{RepoId, RepoSummary, Snapshot};

/// Something subscribers should redraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RegistryEvent {
    /// A repository's change state was recomputed.
    Snapshot {
        repository_id: RepoId,
        snapshot: Snapshot,
    },
    /// The set of registered repositories or their summary counters changed.
    Repositories { registered: Vec<RepoSummary> },
    /// A repository became the current selection.
    CurrentSelected { repository_id: RepoId },
    /// The last repository was removed; nothing is selected.
    NoRepositorySelected,
    /// A repository's watch session stopped after an unrecoverable failure.
    WatchFailed { repository_id: RepoId, error: String },
}

/// Receiving end of the registry's event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<RegistryEvent>,
}

impl Subscription {
    pub(crate) const fn new(rx: broadcast::Receiver<RegistryEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event.
    ///
    /// Events missed because this subscriber fell behind are skipped.
    /// Returns `None` once the registry has shut down.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged; events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}
