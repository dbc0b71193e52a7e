use crate::schema::{MIGRATIONS, SCHEMA_VERSION};
use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Db {
    pub conn: Connection,
    path: PathBuf,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)?;
        apply_pragmas(&conn)?;
        migrate(&mut conn)?;
        Ok(Db { conn, path })
    }

    /// Open an existing, already migrated database without touching the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        apply_pragmas(&conn)?;
        Ok(Db { conn, path })
    }

    /// Database file this connection was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a transaction that takes the database write lock up front.
    ///
    /// Writers in other connections and other processes block (up to the busy
    /// timeout) until this transaction ends, which makes read-check-write
    /// sequences inside it atomic.
    pub fn immediate(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.transaction_with_behavior(TransactionBehavior::Immediate)
    }
}

/// Current wall clock as unix milliseconds.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "cache_size", -65536i64)?; // 64 MiB
    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: i64 = tx.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    for (version, sql) in MIGRATIONS.iter().enumerate() {
        let version = version as i64 + 1;
        if version > current {
            tracing::debug!(version, "applying schema migration");
            tx.execute_batch(sql)?;
        }
    }
    if current < SCHEMA_VERSION {
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    tx.commit()?;
    Ok(())
}
