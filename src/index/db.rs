//! The per-mailbox transactional key-value index.
//!
//! Backed by one SQLite database in WAL mode. Writes go through a single
//! writer connection and `BEGIN IMMEDIATE`, so there is at most one write
//! transaction at a time. Reads check out a connection from a small pool and
//! run in a deferred transaction, which pins a snapshot at its first read and
//! never waits for the writer.

use std::ops::{ControlFlow, Deref};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::index::codec::FORMAT_VERSION;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    key   BLOB PRIMARY KEY,
    value BLOB NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sequences (
    bucket TEXT PRIMARY KEY,
    value  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

/// Tuning knobs for opening an index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// File name of the database inside the mailbox directory.
    pub file_name: String,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Idle reader connections kept around for reuse.
    pub max_idle_readers: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            file_name: "index.db".to_string(),
            busy_timeout: Duration::from_secs(5),
            max_idle_readers: 4,
        }
    }
}

/// An open mailbox index.
pub struct MailboxIndex {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    options: IndexOptions,
    uid_validity: u32,
}

impl MailboxIndex {
    /// Open (creating if needed) the index inside `dir`.
    ///
    /// Fails with [`StoreError::IndexOpen`] when the directory is missing or
    /// the file is not a usable index.
    pub fn open(dir: &Path, options: IndexOptions) -> Result<Self> {
        let path = dir.join(&options.file_name);
        let open_err = |reason: String| StoreError::IndexOpen {
            path: path.clone(),
            reason,
        };

        let meta = std::fs::metadata(dir).map_err(|e| open_err(e.to_string()))?;
        if !meta.is_dir() {
            return Err(open_err("mailbox path is not a directory".into()));
        }

        let mut writer = Connection::open(&path).map_err(|e| open_err(e.to_string()))?;
        let uid_validity =
            init_writer(&mut writer, options.busy_timeout).map_err(|e| match e {
                StoreError::Index(inner) => open_err(inner.to_string()),
                other => other,
            })?;

        info!(path = %path.display(), uid_validity, "Opened mailbox index");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            readers: Mutex::new(Vec::new()),
            options,
            uid_validity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// UID validity assigned when the index was created.
    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    /// Run `f` inside a read transaction over a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.checkout_reader()?;
        let result = (|| -> Result<T> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let out = f(&ReadTxn { conn: &tx })?;
            // Read-only; ending it just releases the snapshot.
            tx.rollback()?;
            Ok(out)
        })();
        self.checkin_reader(conn);
        result
    }

    /// Run `f` inside a write transaction. `Ok` commits, `Err` rolls back.
    pub fn update<T>(&self, f: impl FnOnce(&WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&WriteTxn {
            read: ReadTxn { conn: &tx },
        })?;
        tx.commit()?;
        Ok(out)
    }

    /// Close every connection, reporting the first failure.
    pub fn close(self) -> Result<()> {
        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            debug!(error = %e, "WAL checkpoint on close failed");
        }

        let readers = self
            .readers
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for reader in readers {
            reader.close().map_err(|(_, e)| StoreError::Index(e))?;
        }
        writer.close().map_err(|(_, e)| StoreError::Index(e))?;

        info!(path = %self.path.display(), "Closed mailbox index");
        Ok(())
    }

    fn checkout_reader(&self) -> Result<Connection> {
        let pooled = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        if let Some(conn) = pooled {
            return Ok(conn);
        }

        debug!(path = %self.path.display(), "Opening reader connection");
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.options.busy_timeout)?;
        Ok(conn)
    }

    fn checkin_reader(&self, conn: Connection) {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        if readers.len() < self.options.max_idle_readers {
            readers.push(conn);
        }
    }
}

/// Configure the writer connection and create or validate the schema.
/// Returns the mailbox's UID validity.
fn init_writer(conn: &mut Connection, busy_timeout: Duration) -> Result<u32> {
    conn.busy_timeout(busy_timeout)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        warn!(mode = %mode, "Index is not in WAL mode; readers will block on writes");
    }
    conn.pragma_update(None, "synchronous", "FULL")?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(SCHEMA)?;

    let read = ReadTxn { conn: &tx };
    match read.meta("format_version")? {
        None => {
            tx.execute(
                "INSERT INTO meta (name, value) VALUES ('format_version', ?1)",
                [i64::from(FORMAT_VERSION)],
            )?;
        }
        Some(v) if v == i64::from(FORMAT_VERSION) => {}
        Some(v) => {
            return Err(StoreError::Corrupt(format!(
                "index format version {v} is not supported (expected {FORMAT_VERSION})"
            )));
        }
    }

    let uid_validity = match read.meta("uid_validity")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| StoreError::Corrupt(format!("invalid uid_validity {v}")))?,
        None => {
            let fresh = u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX).max(1);
            tx.execute(
                "INSERT INTO meta (name, value) VALUES ('uid_validity', ?1)",
                [i64::from(fresh)],
            )?;
            fresh
        }
    };

    tx.commit()?;
    Ok(uid_validity)
}

/// Read access to the index inside a transaction.
pub struct ReadTxn<'t> {
    conn: &'t Connection,
}

impl ReadTxn<'_> {
    /// Value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM messages WHERE key = ?1")?;
        Ok(stmt.query_row([key], |row| row.get(0)).optional()?)
    }

    /// Visit every entry in ascending key order until `visit` breaks.
    pub fn scan(
        &self,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM messages ORDER BY key")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            if visit(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn count(&self) -> Result<u32> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    /// Greatest key present.
    pub fn last_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                "SELECT key FROM messages ORDER BY key DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Last value handed out by [`WriteTxn::next_sequence`] (0 if never).
    pub fn sequence(&self, bucket: &str) -> Result<i64> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sequences WHERE bucket = ?1",
                [bucket],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    fn meta(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

/// Read-write access to the index inside a write transaction.
pub struct WriteTxn<'t> {
    read: ReadTxn<'t>,
}

impl<'t> Deref for WriteTxn<'t> {
    type Target = ReadTxn<'t>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl WriteTxn<'_> {
    /// Insert or overwrite the value under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut stmt = self.read.conn.prepare_cached(
            "INSERT INTO messages (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute((key, value))?;
        Ok(())
    }

    /// Remove `key`; returns whether it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut stmt = self
            .read
            .conn
            .prepare_cached("DELETE FROM messages WHERE key = ?1")?;
        Ok(stmt.execute([key])? > 0)
    }

    /// Atomically increment and return the bucket's counter, starting at 1.
    ///
    /// The increment commits or rolls back with the enclosing transaction.
    pub fn next_sequence(&self, bucket: &str) -> Result<i64> {
        self.read.conn.execute(
            "INSERT INTO sequences (bucket, value) VALUES (?1, 1)
             ON CONFLICT(bucket) DO UPDATE SET value = value + 1",
            [bucket],
        )?;
        self.read.sequence(bucket)
    }
}
