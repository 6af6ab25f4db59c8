//! `SQLite`-backed persistence.
//!
//! This module provides:
//! - A shared connection with WAL mode and versioned migrations
//! - The [`KeyValueStore`] used to persist registered repositories

mod connection;
mod kv;
mod schema;

pub use connection::Database;
pub use kv::{KeyValueStore, KeyValueStoreExt, MemoryStore, SqliteStore};
pub use schema::{migrate, verify_schema, SCHEMA_VERSION};

/// Run pending migrations and check the resulting schema.
///
/// # Errors
///
/// Returns an error if a migration fails or a table is missing.
pub fn init_storage(db: &Database) -> crate::Result<()> {
    db.with_conn(|conn| {
        migrate(conn)?;
        verify_schema(conn)
    })?;

    tracing::info!(path = db.path(), "Storage initialized");
    Ok(())
}
