//! Lease rows in `stage_lock` that keep planner instances from running one stage twice.

use rusqlite::{params, OptionalExtension};
use scanfleet_store::Db;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lease {
    /// The caller now holds the lock; carries the previous successful run, if any.
    Acquired { last_run_ms: Option<i64> },
    /// Another live holder owns the lock.
    Busy,
}

/// Take the lease of `name` for `holder` unless a different holder's lease is still live.
pub fn acquire(db: &mut Db, name: &str, holder: &str, ttl: Duration, now: i64) -> rusqlite::Result<Lease> {
    let tx = db.immediate()?;
    tx.execute("INSERT OR IGNORE INTO stage_lock(name) VALUES (?)", [name])?;
    let (current, expires, last_run): (Option<String>, Option<i64>, Option<i64>) = tx.query_row(
        "SELECT holder, expires_ms, last_run_ms FROM stage_lock WHERE name = ?",
        [name],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    if let (Some(other), Some(expires)) = (&current, expires) {
        if other != holder && expires > now {
            debug!(lock = %name, holder = %other, "stage lock busy");
            return Ok(Lease::Busy);
        }
    }
    tx.execute(
        "UPDATE stage_lock SET holder = ?, expires_ms = ? WHERE name = ?",
        params![holder, now + ttl.as_millis() as i64, name],
    )?;
    tx.commit()?;
    Ok(Lease::Acquired { last_run_ms: last_run })
}

/// Drop the lease, stamping `ran_at` as the last run when the body ran.
pub fn release(db: &Db, name: &str, holder: &str, ran_at: Option<i64>) -> rusqlite::Result<()> {
    db.conn.execute(
        "UPDATE stage_lock SET holder = NULL, expires_ms = NULL, last_run_ms = COALESCE(?, last_run_ms)
         WHERE name = ? AND holder = ?",
        params![ran_at, name, holder],
    )?;
    Ok(())
}

pub fn last_run(db: &Db, name: &str) -> rusqlite::Result<Option<i64>> {
    Ok(db
        .conn
        .query_row("SELECT last_run_ms FROM stage_lock WHERE name = ?", [name], |r| r.get::<_, Option<i64>>(0))
        .optional()?
        .flatten())
}
