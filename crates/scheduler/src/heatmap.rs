//! Leaky per-target counter used for admission control.
//!
//! Every assignment adds one to the counter of each target host it contains.
//! The counter drains by one every `decay`; a host is hot while the drained
//! value is at least `hot_level`.

use rusqlite::{params, Connection, OptionalExtension};
use scanfleet_core::interval::serde_interval;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapPolicy {
    /// Effective count at which a host stops receiving new work. `0` disables throttling.
    pub hot_level: i64,
    #[serde(with = "serde_interval")]
    pub decay: Duration,
}

impl Default for HeatmapPolicy {
    fn default() -> Self {
        Self { hot_level: 5, decay: Duration::from_secs(60) }
    }
}

impl HeatmapPolicy {
    fn decay_ms(&self) -> i64 {
        (self.decay.as_millis() as i64).max(1)
    }

    /// Apply the decay accumulated since `updated_ms`, keeping the partial step.
    pub fn normalize(&self, count: i64, updated_ms: i64, now: i64) -> (i64, i64) {
        let step = self.decay_ms();
        let steps = (now - updated_ms).max(0) / step;
        if steps >= count {
            (0, now)
        } else {
            (count - steps, updated_ms + steps * step)
        }
    }

    pub fn effective(&self, count: i64, updated_ms: i64, now: i64) -> i64 {
        self.normalize(count, updated_ms, now).0
    }

    pub fn is_hot(&self, effective: i64) -> bool {
        self.hot_level > 0 && effective >= self.hot_level
    }
}

fn load(conn: &Connection, hashval: &str) -> rusqlite::Result<Option<(i64, i64)>> {
    conn.query_row("SELECT count, updated_ms FROM heatmap WHERE hashval = ?", [hashval], |r| {
        Ok((r.get(0)?, r.get(1)?))
    })
    .optional()
}

/// Effective count of one hash.
pub fn heat(conn: &Connection, policy: &HeatmapPolicy, hashval: &str, now: i64) -> rusqlite::Result<i64> {
    Ok(load(conn, hashval)?.map(|(count, updated)| policy.effective(count, updated, now)).unwrap_or(0))
}

/// Normalize the entry, then add `delta` clamped at zero. Returns the new count.
pub fn touch(conn: &Connection, policy: &HeatmapPolicy, hashval: &str, delta: i64, now: i64) -> rusqlite::Result<i64> {
    let (count, updated) = match load(conn, hashval)? {
        Some((count, updated)) => policy.normalize(count, updated, now),
        None => (0, now),
    };
    let count = (count + delta).max(0);
    // an empty counter restarts its decay window
    let updated = if count == 0 { now } else { updated };
    conn.execute(
        "INSERT INTO heatmap(hashval, count, updated_ms) VALUES (?1, ?2, ?3)
         ON CONFLICT(hashval) DO UPDATE SET count = excluded.count, updated_ms = excluded.updated_ms",
        params![hashval, count, updated],
    )?;
    Ok(count)
}

/// Non-zero effective counts of every entry.
pub fn snapshot(conn: &Connection, policy: &HeatmapPolicy, now: i64) -> rusqlite::Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare("SELECT hashval, count, updated_ms FROM heatmap WHERE count > 0")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)))?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (hashval, count, updated) = row?;
        let effective = policy.effective(count, updated, now);
        if effective > 0 {
            out.insert(hashval, effective);
        }
    }
    Ok(out)
}
