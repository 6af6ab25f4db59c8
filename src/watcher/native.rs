//! File system notifications using notify-rs.

use std::path::Path;

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::debounce::sleep_until_opt;
use super::events::{Stabilizer, WatchEvent, WatchEventKind, WatchSignal};
use super::notifier::{ChangeNotifier, SubscribeRequest, Subscription};
use crate::error::WatcherError;
use crate::Result;

type RawEvent = notify::Result<notify::Event>;

/// Notifier backed by the platform's native watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Live notify watcher plus the task stabilizing its events.
struct NotifySubscription {
    watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl Subscription for NotifySubscription {
    fn close(&mut self) {
        // Dropping the watcher unregisters every watch.
        if self.watcher.take().is_some() {
            self.task.abort();
        }
    }
}

impl Drop for NotifySubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChangeNotifier for NotifyBackend {
    fn subscribe(
        &self,
        request: SubscribeRequest,
        events: mpsc::UnboundedSender<WatchSignal>,
    ) -> Result<Box<dyn Subscription>> {
        let first_root = request
            .roots
            .first()
            .map_or_else(|| request.filter.root().to_path_buf(), |r| r.path.clone());

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WatcherError::watch_failed(&first_root, e))?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let mut watcher = notify::recommended_watcher(move |event: RawEvent| {
            let _ = raw_tx.send(event);
        })
        .map_err(|e| WatcherError::watch_failed(&first_root, e))?;

        for root in &request.roots {
            if !root.path.exists() {
                return Err(WatcherError::watch_failed(&root.path, "directory does not exist").into());
            }
            let mode = if root.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(&root.path, mode)
                .map_err(|e| WatcherError::watch_failed(&root.path, e))?;
            tracing::debug!(path = %root.path.display(), recursive = root.recursive, "Watching directory");
        }

        let task = runtime.spawn(stabilize(raw_rx, request, events));

        Ok(Box::new(NotifySubscription {
            watcher: Some(watcher),
            task,
        }))
    }
}

/// Forward raw notify events once each path has been quiet long enough.
async fn stabilize(
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    request: SubscribeRequest,
    events: mpsc::UnboundedSender<WatchSignal>,
) {
    let mut stabilizer = Stabilizer::new(request.stabilization);

    loop {
        let due = stabilizer.next_due();
        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(Ok(event)) => {
                    let now = Instant::now();
                    for path in event.paths {
                        if request.filter.is_ignored(&path) {
                            continue;
                        }
                        if let Some(kind) = classify(&event.kind, &path) {
                            stabilizer.record(kind, path, now);
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(source = ?request.source, "Watch error: {e}");
                    let _ = events.send(WatchSignal::Failed(WatcherError::StreamFailed(e.to_string())));
                    return;
                }
                None => return,
            },
            () = sleep_until_opt(due) => {
                for (kind, path) in stabilizer.drain_settled(Instant::now()) {
                    let event = WatchEvent::new(request.source, kind, path);
                    if events.send(WatchSignal::Event(event)).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Map a notify event kind to add/change/remove. Reads are dropped.
fn classify(kind: &EventKind, path: &Path) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Add),
        EventKind::Remove(_) => Some(WatchEventKind::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => Some(if path.exists() {
            WatchEventKind::Add
        } else {
            WatchEventKind::Remove
        }),
        EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            Some(WatchEventKind::Change)
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::events::EventSource;
    use crate::watcher::filter::PathFilter;
    use crate::watcher::notifier::WatchRoot;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(root: &Path) -> SubscribeRequest {
        SubscribeRequest {
            source: EventSource::Content,
            roots: vec![WatchRoot::recursive(root)],
            filter: PathFilter::for_content(root, &[]).unwrap(),
            stabilization: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_classify() {
        let p = Path::new("/definitely/not/here");
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), p),
            Some(WatchEventKind::Add)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), p),
            Some(WatchEventKind::Change)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File), p),
            Some(WatchEventKind::Remove)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(notify::event::RenameMode::From)), p),
            Some(WatchEventKind::Remove)
        );
        assert_eq!(classify(&EventKind::Access(AccessKind::Read), p), None);
    }

    #[tokio::test]
    async fn test_subscribe_nonexistent_dir() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut req = request(tmp.path());
        req.roots = vec![WatchRoot::recursive(&missing)];

        let result = NotifyBackend::new().subscribe(req, tx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_settled_event() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut subscription = NotifyBackend::new().subscribe(request(&root), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("ignored.png"), [0u8; 4]).unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within 5s")
            .unwrap();
        match signal {
            WatchSignal::Event(event) => {
                assert_eq!(event.source, EventSource::Content);
                assert!(event.path.ends_with("main.rs"));
            }
            WatchSignal::Failed(e) => panic!("unexpected failure: {e}"),
        }

        subscription.close();
        subscription.close();
    }
}
