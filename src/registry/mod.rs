//! Registered repositories and the current selection.
//!
//! This module provides:
//! - [`RepoRegistry`], which owns one watch session per repository
//! - [`RegistryEvent`]s pushed to subscribers
//! - Persistence of registrations across restarts

mod events;
mod monitor;

pub use events::{RegistryEvent, Subscription};
pub use monitor::{
    RecentRepository, RepoRegistry, CURRENT_KEY, MAX_RECENT, RECENT_KEY, REPOSITORIES_KEY,
};
