//! Key-value persistence for registry state.

use std::collections::HashMap;

use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::connection::Database;
use crate::error::StorageError;
use crate::Result;

/// Persisted JSON documents addressed by key.
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Typed access on top of [`KeyValueStore`].
pub trait KeyValueStoreExt: KeyValueStore {
    /// Decode the value under `key`, or return `default` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the value does not decode as `T`.
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(default),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StorageError::serialization(key, e).into()),
        }
    }

    /// Encode and store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store fails.
    fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| StorageError::serialization(key, e))?;
        self.set(key, value)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Store backed by the `kv_store` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Wrap a database that has already been migrated.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv_store WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()).into())
        })?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| StorageError::serialization(key, e).into())
        })
        .transpose()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let raw = value.to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                rusqlite::params![key, raw, chrono::Utc::now().timestamp()],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(())
        })
    }
}

/// Store that keeps values in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}
