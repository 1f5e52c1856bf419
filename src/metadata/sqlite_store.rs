//! SQLite implementation of the metadata backend
//!
//! Hashes, sets and expiry deadlines live in three tables keyed by the
//! metadata key. Expired keys are dropped lazily when touched and in bulk by
//! [`MetadataBackend::purge_expired`].

use crate::error::MetadataError;
use crate::metadata::{BatchOp, BatchReply, MetadataBackend};
use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta_hash (
        key TEXT NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (key, field)
    );
    CREATE TABLE IF NOT EXISTS meta_set (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (key, member)
    );
    CREATE TABLE IF NOT EXISTS meta_expiry (
        key TEXT PRIMARY KEY,
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_meta_expiry_deadline ON meta_expiry (expires_at);
";

/// Metadata backend persisted in a SQLite database
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    // Milliseconds added to the wall clock, moved forward by tests
    clock_skew: AtomicI64,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::UnexpectedReply(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        info!("Opened metadata database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Database that lives only as long as this backend
    pub fn in_memory() -> Result<Self, MetadataError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, MetadataError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock_skew: AtomicI64::new(0),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MetadataError> {
        self.conn.lock().map_err(|_| MetadataError::Poisoned)
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis() + self.clock_skew.load(Ordering::Relaxed)
    }

    /// Move the backend clock forward
    pub fn advance_clock(&self, by: Duration) {
        self.clock_skew
            .fetch_add(by.as_millis() as i64, Ordering::Relaxed);
    }

    /// Remaining time to live of a key
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, MetadataError> {
        let now = self.now_millis();
        let conn = self.lock()?;
        purge_if_expired(&conn, key, now)?;
        let deadline: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM meta_expiry WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(deadline.map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    fn apply(&self, op: BatchOp) -> Result<BatchReply, MetadataError> {
        let now = self.now_millis();
        let conn = self.lock()?;
        match op {
            BatchOp::Delete(key) => {
                delete_key(&conn, &key)?;
                Ok(BatchReply::Done)
            }
            BatchOp::HashSet { key, fields } => {
                purge_if_expired(&conn, &key, now)?;
                for (field, value) in fields {
                    conn.execute(
                        "INSERT INTO meta_hash (key, field, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                        params![key, field, value],
                    )?;
                }
                Ok(BatchReply::Done)
            }
            BatchOp::HashGetAll(key) => {
                purge_if_expired(&conn, &key, now)?;
                let mut stmt = conn.prepare("SELECT field, value FROM meta_hash WHERE key = ?1")?;
                let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let fields: BTreeMap<String, String> = rows.collect::<Result<_, _>>()?;
                Ok(BatchReply::Hash(fields))
            }
            BatchOp::SetAdd { key, members } => {
                purge_if_expired(&conn, &key, now)?;
                for member in members {
                    conn.execute(
                        "INSERT OR IGNORE INTO meta_set (key, member) VALUES (?1, ?2)",
                        params![key, member],
                    )?;
                }
                Ok(BatchReply::Done)
            }
            BatchOp::SetRemove { key, members } => {
                purge_if_expired(&conn, &key, now)?;
                for member in members {
                    conn.execute(
                        "DELETE FROM meta_set WHERE key = ?1 AND member = ?2",
                        params![key, member],
                    )?;
                }
                if !key_exists(&conn, &key)? {
                    conn.execute("DELETE FROM meta_expiry WHERE key = ?1", params![key])?;
                }
                Ok(BatchReply::Done)
            }
            BatchOp::SetMembers(key) => {
                purge_if_expired(&conn, &key, now)?;
                let mut stmt =
                    conn.prepare("SELECT member FROM meta_set WHERE key = ?1 ORDER BY member")?;
                let rows = stmt.query_map(params![key], |row| row.get(0))?;
                Ok(BatchReply::Members(rows.collect::<Result<_, _>>()?))
            }
            BatchOp::Expire { key, ttl } => {
                purge_if_expired(&conn, &key, now)?;
                if key_exists(&conn, &key)? {
                    let deadline = now + ttl.as_millis() as i64;
                    conn.execute(
                        "INSERT INTO meta_expiry (key, expires_at) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                        params![key, deadline],
                    )?;
                }
                Ok(BatchReply::Done)
            }
        }
    }
}

fn delete_key(conn: &Connection, key: &str) -> Result<(), MetadataError> {
    conn.execute("DELETE FROM meta_hash WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM meta_set WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM meta_expiry WHERE key = ?1", params![key])?;
    Ok(())
}

fn key_exists(conn: &Connection, key: &str) -> Result<bool, MetadataError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM meta_hash WHERE key = ?1)
             OR EXISTS (SELECT 1 FROM meta_set WHERE key = ?1)",
        params![key],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn purge_if_expired(conn: &Connection, key: &str, now: i64) -> Result<(), MetadataError> {
    let deadline: Option<i64> = conn
        .query_row(
            "SELECT expires_at FROM meta_expiry WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    if matches!(deadline, Some(at) if at <= now) {
        debug!("Expired metadata key {}", key);
        delete_key(conn, key)?;
    }
    Ok(())
}

impl MetadataBackend for SqliteBackend {
    fn execute(&self, batch: Vec<BatchOp>) -> Result<Vec<BatchReply>, MetadataError> {
        batch.into_iter().map(|op| self.apply(op)).collect()
    }

    fn purge_expired(&self) -> Result<usize, MetadataError> {
        let now = self.now_millis();
        let conn = self.lock()?;
        let expired: Vec<String> = {
            let mut stmt = conn.prepare("SELECT key FROM meta_expiry WHERE expires_at <= ?1")?;
            let rows = stmt.query_map(params![now], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for key in &expired {
            delete_key(&conn, key)?;
        }
        if !expired.is_empty() {
            debug!("Purged {} expired metadata keys", expired.len());
        }
        Ok(expired.len())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
