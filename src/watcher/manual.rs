//! In-process notifier driven by explicit calls, for tests and embedders.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::events::{EventSource, WatchEvent, WatchSignal};
use super::filter::PathFilter;
use super::notifier::{ChangeNotifier, SubscribeRequest, Subscription, WatchRoot};
use crate::error::WatcherError;
use crate::Result;

struct Registration {
    source: EventSource,
    roots: Vec<WatchRoot>,
    filter: PathFilter,
    sender: mpsc::UnboundedSender<WatchSignal>,
    closed: Arc<AtomicBool>,
}

impl Registration {
    fn covers(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| {
            path.strip_prefix(&root.path).is_ok_and(|rel| {
                root.recursive || rel.components().count() <= 1
            })
        })
    }
}

/// Notifier whose events are injected with [`ManualNotifier::emit`].
///
/// Stabilization is skipped: emitted events are delivered immediately.
#[derive(Default)]
pub struct ManualNotifier {
    registrations: Mutex<Vec<Registration>>,
    fail_next: Mutex<Option<String>>,
}

impl std::fmt::Debug for ManualNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualNotifier")
            .field("open_subscriptions", &self.open_subscriptions())
            .finish_non_exhaustive()
    }
}

impl ManualNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `subscribe` call fail with `reason`.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    /// Deliver `event` to every open subscription of its source whose roots
    /// contain the path and whose filter accepts it.
    ///
    /// Returns the number of subscriptions that received the event.
    pub fn emit(&self, event: WatchEvent) -> usize {
        let mut registrations = self.registrations.lock();
        registrations.retain(|r| !r.closed.load(Ordering::SeqCst));

        registrations
            .iter()
            .filter(|r| r.source == event.source)
            .filter(|r| r.covers(&event.path) && !r.filter.is_ignored(&event.path))
            .filter(|r| r.sender.send(WatchSignal::Event(event.clone())).is_ok())
            .count()
    }

    /// Report a stream failure on every open subscription of `source`.
    pub fn fail(&self, source: EventSource, reason: &str) -> usize {
        let mut registrations = self.registrations.lock();
        registrations.retain(|r| !r.closed.load(Ordering::SeqCst));

        registrations
            .iter()
            .filter(|r| r.source == source)
            .filter(|r| {
                r.sender
                    .send(WatchSignal::Failed(WatcherError::StreamFailed(reason.to_string())))
                    .is_ok()
            })
            .count()
    }

    /// Number of subscriptions that have not been closed.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.registrations
            .lock()
            .iter()
            .filter(|r| !r.closed.load(Ordering::SeqCst))
            .count()
    }
}

struct ManualSubscription {
    closed: Arc<AtomicBool>,
}

impl Subscription for ManualSubscription {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for ManualSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChangeNotifier for ManualNotifier {
    fn subscribe(
        &self,
        request: SubscribeRequest,
        events: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn Subscription>> {
        if let Some(reason) = self.fail_next.lock().take() {
            let path = request
                .roots
                .first()
                .map_or_else(|| request.filter.root().to_path_buf(), |r| r.path.clone());
            return Err(WatcherError::watch_failed(&path, reason).into());
        }

        let closed = Arc::new(AtomicBool::new(false));
        self.registrations.lock().push(Registration {
            source: request.source,
            roots: request.roots,
            filter: request.filter,
            sender: events,
            closed: Arc::clone(&closed),
        });
        Ok(Box::new(ManualSubscription { closed }))
    }
}
