//! Configuration management for repomon.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - Built-in defaults (lowest priority)

mod settings;

pub use settings::{
    Config, SessionConfig, DEFAULT_CONTENT_DEBOUNCE, DEFAULT_METADATA_DEBOUNCE,
    DEFAULT_ORACLE_TIMEOUT, DEFAULT_STABILIZATION_DELAY,
};
