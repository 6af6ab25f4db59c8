//! File system event types and write stabilization.

#![allow(clippy::missing_const_for_fn)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::WatcherError;

/// Which subscription an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Working-tree files.
    Content,
    /// Version-control metadata (`HEAD`, refs, index).
    Metadata,
}

/// File system event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Change,
    Remove,
}

impl WatchEventKind {
    /// Combine two events for the same path. `None` means they cancel out.
    #[must_use]
    pub fn merge(self, next: Self) -> Option<Self> {
        match (self, next) {
            (Self::Add, Self::Change) => Some(Self::Add),
            (Self::Add, Self::Remove) => None,
            (Self::Remove, Self::Add) => Some(Self::Change),
            (_, next) => Some(next),
        }
    }
}

/// A settled event for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub source: EventSource,
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

impl WatchEvent {
    pub fn new(source: EventSource, kind: WatchEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            kind,
            path: path.into(),
        }
    }
}

/// What a subscription delivers to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Event(WatchEvent),
    /// The subscription can no longer deliver events.
    Failed(WatcherError),
}

#[derive(Debug)]
struct PendingEvent {
    kind: WatchEventKind,
    due: Instant,
}

/// Holds back per-path events until the path has been quiet for `delay`,
/// so half-written files are not reported.
#[derive(Debug)]
pub struct Stabilizer {
    delay: Duration,
    pending: HashMap<PathBuf, PendingEvent>,
}

impl Stabilizer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Record a raw event, restarting that path's quiet period.
    pub fn record(&mut self, kind: WatchEventKind, path: PathBuf, now: Instant) {
        let due = now + self.delay;
        match self.pending.remove(&path) {
            Some(prev) => {
                if let Some(kind) = prev.kind.merge(kind) {
                    self.pending.insert(path, PendingEvent { kind, due });
                }
            }
            None => {
                self.pending.insert(path, PendingEvent { kind, due });
            }
        }
    }

    /// Earliest instant at which some path settles.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.due).min()
    }

    /// Remove and return every path that has settled by `now`.
    pub fn drain_settled(&mut self, now: Instant) -> Vec<(WatchEventKind, PathBuf)> {
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut events: Vec<(WatchEventKind, PathBuf)> = settled
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|p| (p.kind, path)))
            .collect();
        events.sort_by(|a, b| a.1.cmp(&b.1));
        events
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
