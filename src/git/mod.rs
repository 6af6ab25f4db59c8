//! Version-control introspection.
//!
//! This module provides:
//! - The [`GitOracle`] interface and a `git` CLI implementation
//! - Porcelain status parsing and per-path classification
//! - The [`StatusComputer`] that assembles snapshots

mod cli;
mod computer;
mod memory;
mod oracle;
mod placeholder;
mod status;

pub use cli::GitCli;
pub use computer::{StatusComputer, NOT_A_REPOSITORY};
pub use memory::MemoryOracle;
pub use oracle::{GitOracle, OracleResult};
pub use status::{parse_porcelain, RepoStatus, DETACHED_BRANCH};
