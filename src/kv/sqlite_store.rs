//! SQLite implementation of the KvStore trait

use crate::error::StoreError;
use crate::kv::{KvOp, KvStore, Namespace, UpdateFn};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed key-value store. One connection, serialized by a mutex;
/// every trait call runs to completion before the next one starts.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>, wal_mode: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        if wal_mode {
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            debug!("SQLite journal mode: {}", mode);
        }
        info!("Opened key-value database at {}", path.display());
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

const UPSERT: &str = "INSERT OR REPLACE INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)";
const SELECT: &str = "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2";
const REMOVE: &str = "DELETE FROM kv WHERE namespace = ?1 AND key = ?2";

impl KvStore for SqliteKvStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(SELECT, params![ns.as_str(), key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(UPSERT, params![ns.as_str(), key, value])?;
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(REMOVE, params![ns.as_str(), key])?;
        Ok(())
    }

    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in &ops {
            match op {
                KvOp::Put { ns, key, value } => {
                    tx.execute(UPSERT, params![ns.as_str(), key, value])?;
                }
                KvOp::Insert { ns, key, value } => {
                    let exists = tx
                        .query_row(SELECT, params![ns.as_str(), key], |_| Ok(()))
                        .optional()?
                        .is_some();
                    if exists {
                        // Dropping the transaction rolls back earlier ops
                        return Err(StoreError::Conflict(key.clone()));
                    }
                    tx.execute(UPSERT, params![ns.as_str(), key, value])?;
                }
                KvOp::Delete { ns, key } => {
                    tx.execute(REMOVE, params![ns.as_str(), key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update(&self, ns: Namespace, key: &str, f: &mut UpdateFn<'_>) -> Result<Vec<u8>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = tx
            .query_row(SELECT, params![ns.as_str(), key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        // An error from the closure drops the transaction, which rolls it back
        let next = f(current)?;
        tx.execute(UPSERT, params![ns.as_str(), key, &next])?;
        tx.commit()?;
        Ok(next)
    }

    fn scan_keys(&self, ns: Namespace, limit: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key LIMIT ?2")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![ns.as_str(), limit], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}
