//! SQLite-backed storage adapter.
//!
//! Uses rusqlite with WAL mode. The engine only needs a key/value table,
//! but migrations are versioned the same way as the main POS database so
//! later schema changes slot in without special cases.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{Result, SyncError};
use crate::storage::StorageAdapter;

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Open `{data_dir}/offline-queue.db`, creating the directory if needed.
    ///
    /// On corruption or open failure, deletes the file and retries once.
    pub fn init(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .map_err(|e| SyncError::Storage(format!("Failed to create data dir: {e}")))?;

        let db_path = data_dir.join("offline-queue.db");
        info!("Opening offline queue database at {}", db_path.display());

        let conn = match open_and_configure(&db_path).and_then(|c| {
            run_migrations(&c)?;
            Ok(c)
        }) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Database open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                let conn = open_and_configure(&db_path).map_err(|e| {
                    SyncError::Storage(format!("Database open failed after retry: {e}"))
                })?;
                run_migrations(&conn)?;
                conn
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncError::Storage(e.to_string()))
    }
}

fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating offline queue database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: key/value record table.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS offline_store (
            storage_key TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        SyncError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (offline_store table)");
    Ok(())
}

impl StorageAdapter for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT payload FROM offline_store WHERE storage_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO offline_store (storage_key, payload, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(storage_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM offline_store WHERE storage_key = ?1",
            params![key],
        )?;
        Ok(())
    }
}
