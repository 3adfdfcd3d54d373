//! SQLite-backed store for every repository port
//!
//! Versioned records (distress events, vehicles, tiers, paths, runs) are kept
//! as JSON beside an integer `version` column, and every update is a single
//! `UPDATE ... WHERE id = ? AND version = ?`, so nodes sharing one database
//! file never overwrite each other's writes. The scheduled message claim runs
//! inside a `BEGIN IMMEDIATE` transaction, so two stores opened on the same
//! file never claim the same row.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::StoreError;

mod messages;
mod records;

/// Store over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Create or open a store at the given path
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> std::result::Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> std::result::Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_messages (
                id TEXT PRIMARY KEY,
                recipient_user_id TEXT,
                raw_recipient TEXT,
                kind TEXT NOT NULL,
                channel TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                scheduled_for INTEGER NOT NULL,
                sent_at INTEGER,
                claimed_by TEXT,
                created INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                last_error TEXT,
                CHECK ((recipient_user_id IS NULL) <> (raw_recipient IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_messages_due ON scheduled_messages(status, scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_messages_user ON scheduled_messages(recipient_user_id);

            CREATE TABLE IF NOT EXISTS notification_preferences (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS distress_events (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                status TEXT NOT NULL,
                active INTEGER NOT NULL,
                created INTEGER NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_distress_status ON distress_events(status);
            CREATE INDEX IF NOT EXISTS idx_distress_subject ON distress_events(subject_id);

            CREATE TABLE IF NOT EXISTS vehicles (
                id TEXT PRIMARY KEY,
                available INTEGER NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS facilities (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                emergency INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracking_updates (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                distress_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tracking_distress ON tracking_updates(distress_id, seq);

            CREATE TABLE IF NOT EXISTS escalation_tiers (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS escalation_paths (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS escalation_runs (
                id TEXT PRIMARY KEY,
                distress_id TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_one_active
                ON escalation_runs(distress_id) WHERE active = 1;
            "#,
        )?;
        Ok(())
    }

    /// Database path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
