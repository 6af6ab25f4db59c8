//! File system watching and debounced refresh.
//!
//! This module provides:
//! - The [`ChangeNotifier`] interface with a notify-rs backend and a manual one
//! - Gitignore-style noise filtering
//! - Per-path write stabilization and per-repository debouncing
//! - [`WatchSession`], which turns change events into snapshots

mod debounce;
mod events;
mod filter;
mod manual;
mod native;
mod notifier;
mod session;

pub use debounce::{Debouncer, Phase};
pub use events::{EventSource, Stabilizer, WatchEvent, WatchEventKind, WatchSignal};
pub use filter::{find_git_dir, PathFilter};
pub use manual::ManualNotifier;
pub use native::NotifyBackend;
pub use notifier::{ChangeNotifier, SubscribeRequest, Subscription, WatchRoot};
pub use session::{SessionUpdate, WatchSession};
