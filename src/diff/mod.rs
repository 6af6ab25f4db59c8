//! Unified diff parsing.
//!
//! Turns the text produced by `git diff` (or a synthesized equivalent) into
//! hunks, add/delete counts and a "jump to change" cursor target.

mod parser;

pub use parser::{parse, DiffLine, DiffStats, Hunk, LineKind, ParsedDiff};
