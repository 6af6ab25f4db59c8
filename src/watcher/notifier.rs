//! Change-notification interface.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use super::events::{EventSource, WatchSignal};
use super::filter::PathFilter;
use crate::Result;

/// A directory to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchRoot {
    pub fn recursive(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
        }
    }

    pub fn shallow(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
        }
    }
}

/// Parameters of one subscription.
#[derive(Debug)]
pub struct SubscribeRequest {
    /// Tag attached to every event of this subscription.
    pub source: EventSource,
    pub roots: Vec<WatchRoot>,
    /// Events for ignored paths are dropped before stabilization.
    pub filter: PathFilter,
    /// Quiet period a path needs before its event is delivered.
    pub stabilization: Duration,
}

/// Handle to a live subscription.
pub trait Subscription: Send {
    /// Stop delivering events. Idempotent.
    fn close(&mut self);
}

/// Capability to subscribe to filesystem changes.
pub trait ChangeNotifier: Send + Sync {
    /// Start delivering events matching `request` into `events`.
    ///
    /// # Errors
    ///
    /// Returns a watcher error if any root cannot be watched.
    fn subscribe(
        &self,
        request: SubscribeRequest,
        events: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn Subscription>>;
}
