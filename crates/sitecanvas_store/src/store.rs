use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::bus::{ChangeBus, StorageEvent};
use crate::error::StoreError;

/// String key-value storage with a byte quota, the local-storage stand-in.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Returns whether the key existed.
    fn remove(&mut self, key: &str) -> Result<bool, StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

fn check_quota(
    quota: Option<usize>,
    used_by_others: usize,
    key: &str,
    value: &str,
) -> Result<(), StoreError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let needed = entry_size(key, value);
    let available = quota.saturating_sub(used_by_others);
    if needed > available {
        return Err(StoreError::QuotaExceeded {
            key: key.to_string(),
            needed,
            available,
        });
    }
    Ok(())
}

/// SQLite-backed store shared by every process that opens the same file.
pub struct SqliteStore {
    conn: Connection,
    quota_bytes: Option<usize>,
    bus: Option<ChangeBus>,
}

const SCHEMA_VERSION: i64 = 1;

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta(\
                key TEXT PRIMARY KEY,\
                value INTEGER NOT NULL\
            );",
        )?;
        let version: Option<i64> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(version) = version {
            if version != SCHEMA_VERSION {
                tracing::warn!(
                    found = version,
                    expected = SCHEMA_VERSION,
                    "storage schema version mismatch, recreating storage"
                );
                conn.execute_batch(
                    "DROP TABLE IF EXISTS entries;\
                    DROP TABLE IF EXISTS meta;",
                )?;
            }
        }
        create_schema(&conn)?;
        Ok(Self {
            conn,
            quota_bytes: None,
            bus: None,
        })
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn used_by_others(&self, key: &str) -> Result<usize, StoreError> {
        let used: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)\n\
                FROM entries WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }

    fn publish(&self, key: &str, new_value: Option<&str>) {
        if let Some(bus) = &self.bus {
            bus.publish(StorageEvent {
                key: key.to_string(),
                new_value: new_value.map(str::to_string),
            });
        }
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta(\
            key TEXT PRIMARY KEY,\
            value INTEGER NOT NULL\
        );\
        CREATE TABLE IF NOT EXISTS entries(\
            key TEXT PRIMARY KEY,\
            value TEXT NOT NULL,\
            updated_utc INTEGER NULL\
        );",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        check_quota(self.quota_bytes, self.used_by_others(key)?, key, value)?;
        self.conn.execute(
            "INSERT INTO entries (key, value, updated_utc)\n\
                VALUES (?1, ?2, ?3)\n\
                ON CONFLICT(key) DO UPDATE SET\n\
                    value = excluded.value,\n\
                    updated_utc = excluded.updated_utc",
            params![key, value, Utc::now().timestamp()],
        )?;
        self.publish(key, Some(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        if removed > 0 {
            self.publish(key, None);
        }
        Ok(removed > 0)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT key FROM entries ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

/// In-process store. Clones share the same entries, like tabs sharing one origin.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
    bus: Option<ChangeBus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn used_bytes(&self) -> usize {
        self.entries()
            .iter()
            .map(|(key, value)| entry_size(key, value))
            .sum()
    }

    fn publish(&self, key: &str, new_value: Option<&str>) {
        if let Some(bus) = &self.bus {
            bus.publish(StorageEvent {
                key: key.to_string(),
                new_value: new_value.map(str::to_string),
            });
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        {
            let mut entries = self.entries();
            let used_by_others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, value)| entry_size(existing, value))
                .sum();
            check_quota(self.quota_bytes, used_by_others, key, value)?;
            entries.insert(key.to_string(), value.to_string());
        }
        self.publish(key, Some(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StoreError> {
        let removed = self.entries().remove(key).is_some();
        if removed {
            self.publish(key, None);
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries().keys().cloned().collect())
    }
}
