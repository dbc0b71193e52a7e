use crate::models::{Host, HostId, Note, Service, Vuln};
use crate::Db;
use anyhow::{bail, Result};
use rusqlite::Connection;

const TABLES: &[&str] = &["queue", "target", "job", "heatmap", "stage_lock", "host", "service", "note", "vuln"];

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    if !TABLES.contains(&table) {
        bail!("unknown table: {table}");
    }
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
}

pub fn list_hosts(conn: &Connection) -> rusqlite::Result<Vec<Host>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM host ORDER BY id", Host::COLUMNS))?;
    let rows = stmt.query_map([], Host::from_row)?;
    rows.collect()
}

pub fn host_addresses(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT address FROM host ORDER BY id")?;
    let rows = stmt.query_map([], |r| r.get(0))?;
    rows.collect()
}

pub fn list_services(conn: &Connection, host_id: Option<HostId>) -> rusqlite::Result<Vec<Service>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM service WHERE ?1 IS NULL OR host_id = ?1 ORDER BY id",
        Service::COLUMNS
    ))?;
    let rows = stmt.query_map([host_id], Service::from_row)?;
    rows.collect()
}

pub fn list_notes(conn: &Connection, host_id: HostId) -> rusqlite::Result<Vec<Note>> {
    let mut stmt = conn.prepare("SELECT id, host_id, service_id, via_target, xtype, data FROM note WHERE host_id = ? ORDER BY id")?;
    let rows = stmt.query_map([host_id], |r| {
        Ok(Note {
            id: r.get(0)?,
            host_id: r.get(1)?,
            service_id: r.get(2)?,
            via_target: r.get(3)?,
            xtype: r.get(4)?,
            data: r.get(5)?,
        })
    })?;
    rows.collect()
}

pub fn list_vulns(conn: &Connection, host_id: Option<HostId>) -> rusqlite::Result<Vec<Vuln>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM vuln WHERE ?1 IS NULL OR host_id = ?1 ORDER BY id",
        Vuln::COLUMNS
    ))?;
    let rows = stmt.query_map([host_id], Vuln::from_row)?;
    rows.collect()
}
