//! repomon library
//!
//! Watches local git repositories and keeps an up-to-date view of their
//! uncommitted changes: per-file classification, unified diffs and
//! add/delete counts, pushed to subscribers whenever the working tree or
//! the repository metadata changes.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod models;
pub mod observability;
pub mod registry;
pub mod storage;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
