//! Natural-key upserts and maintenance over hosts, services, notes and vulns.

use crate::models::{AnnotationKey, HostId, ServiceId, Vuln, VulnFields};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

pub fn upsert_host(conn: &Connection, address: &str, hostname: Option<&str>, os: Option<&str>, now: i64) -> rusqlite::Result<HostId> {
    conn.execute(
        "INSERT INTO host(address, hostname, os, created_ms, modified_ms) VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(address) DO UPDATE SET
           hostname = COALESCE(excluded.hostname, host.hostname),
           os = COALESCE(excluded.os, host.os),
           modified_ms = excluded.modified_ms
         WHERE host.hostname IS NOT COALESCE(excluded.hostname, host.hostname)
            OR host.os IS NOT COALESCE(excluded.os, host.os)",
        params![address, hostname, os, now],
    )?;
    conn.query_row("SELECT id FROM host WHERE address = ?", [address], |r| r.get(0))
}

pub fn host_id_by_address(conn: &Connection, address: &str) -> rusqlite::Result<Option<HostId>> {
    conn.query_row("SELECT id FROM host WHERE address = ?", [address], |r| r.get(0)).optional()
}

#[allow(clippy::too_many_arguments)]
pub fn upsert_service(
    conn: &Connection,
    host_id: HostId,
    proto: &str,
    port: u16,
    state: &str,
    name: Option<&str>,
    info: Option<&str>,
) -> rusqlite::Result<ServiceId> {
    conn.execute(
        "INSERT INTO service(host_id, proto, port, state, name, info) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(host_id, proto, port) DO UPDATE SET
           state = excluded.state,
           name = COALESCE(excluded.name, service.name),
           info = COALESCE(excluded.info, service.info)",
        params![host_id, proto, port, state, name, info],
    )?;
    conn.query_row(
        "SELECT id FROM service WHERE host_id = ? AND proto = ? AND port = ?",
        params![host_id, proto, port],
        |r| r.get(0),
    )
}

pub fn service_id_by_key(conn: &Connection, host_id: HostId, proto: &str, port: u16) -> rusqlite::Result<Option<ServiceId>> {
    conn.query_row(
        "SELECT id FROM service WHERE host_id = ? AND proto = ? AND port = ?",
        params![host_id, proto, port],
        |r| r.get(0),
    )
    .optional()
}

// `IS` instead of `=` so NULL service/via_target compare equal.
const ANNOTATION_MATCH: &str = "host_id = ?1 AND service_id IS ?2 AND via_target IS ?3 AND xtype = ?4";

pub fn upsert_note(conn: &Connection, key: &AnnotationKey, data: &str) -> rusqlite::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM note WHERE {ANNOTATION_MATCH}"),
            params![key.host_id, key.service_id, key.via_target, key.xtype],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute("UPDATE note SET data = ? WHERE id = ?", params![data, id])?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO note(host_id, service_id, via_target, xtype, data) VALUES (?, ?, ?, ?, ?)",
                params![key.host_id, key.service_id, key.via_target, key.xtype, data],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

pub fn upsert_vuln(conn: &Connection, key: &AnnotationKey, fields: &VulnFields) -> rusqlite::Result<i64> {
    let refs = serde_json::to_string(&fields.refs).unwrap_or_else(|_| "[]".into());
    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM vuln WHERE {ANNOTATION_MATCH}"),
            params![key.host_id, key.service_id, key.via_target, key.xtype],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE vuln SET name = ?, severity = ?, descr = ?, data = ?, refs = ? WHERE id = ?",
                params![fields.name, fields.severity, fields.descr, fields.data, refs, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO vuln(host_id, service_id, via_target, xtype, name, severity, descr, data, refs)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![key.host_id, key.service_id, key.via_target, key.xtype, fields.name, fields.severity, fields.descr, fields.data, refs],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Delete vulns of `host_id` whose xtype starts with `xtype_prefix` and whose key is not in `keep`.
pub fn prune_vulns(conn: &Connection, host_id: HostId, xtype_prefix: &str, keep: &HashSet<AnnotationKey>) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM vuln WHERE host_id = ? AND substr(xtype, 1, length(?2)) = ?2",
        Vuln::COLUMNS
    ))?;
    let stale: Vec<i64> = stmt
        .query_map(params![host_id, xtype_prefix], Vuln::from_row)?
        .filter_map(|v| v.ok())
        .filter(|v| {
            let key = AnnotationKey {
                host_id: v.host_id,
                service_id: v.service_id,
                via_target: v.via_target.clone(),
                xtype: v.xtype.clone(),
            };
            !keep.contains(&key)
        })
        .map(|v| v.id)
        .collect();
    let mut del = conn.prepare("DELETE FROM vuln WHERE id = ?")?;
    for id in &stale {
        del.execute([id])?;
    }
    Ok(stale.len())
}

/// Remove services in any state other than open.
pub fn delete_non_open_services(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM service WHERE state NOT LIKE 'open%'", [])
}

/// Remove hosts that carry no information: no os/comment, no services, no vulns, and
/// either no notes or a single administrative `hostnames` note.
pub fn delete_empty_hosts(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM host WHERE id IN (
           SELECT h.id FROM host h
           WHERE (h.os IS NULL OR h.os = '')
             AND (h.comment IS NULL OR h.comment = '')
             AND NOT EXISTS (SELECT 1 FROM service s WHERE s.host_id = h.id)
             AND NOT EXISTS (SELECT 1 FROM vuln v WHERE v.host_id = h.id)
             AND (
               NOT EXISTS (SELECT 1 FROM note n WHERE n.host_id = h.id)
               OR (
                 (SELECT COUNT(*) FROM note n WHERE n.host_id = h.id) = 1
                 AND EXISTS (SELECT 1 FROM note n WHERE n.host_id = h.id AND n.xtype = 'hostnames')
               )
             )
         )",
        [],
    )
}

/// `(id, address)` of hosts not rescanned since `horizon_ms`.
pub fn hosts_due_for_rescan(conn: &Connection, horizon_ms: i64) -> rusqlite::Result<Vec<(HostId, String)>> {
    let mut stmt = conn.prepare("SELECT id, address FROM host WHERE rescan_ms IS NULL OR rescan_ms < ? ORDER BY id")?;
    let rows = stmt.query_map([horizon_ms], |r| Ok((r.get(0)?, r.get(1)?)))?;
    rows.collect()
}

/// `(id, proto, address, port)` of services not rescanned since `horizon_ms`.
pub fn services_due_for_rescan(conn: &Connection, horizon_ms: i64) -> rusqlite::Result<Vec<(ServiceId, String, String, u16)>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.proto, h.address, s.port FROM service s JOIN host h ON h.id = s.host_id
         WHERE s.rescan_ms IS NULL OR s.rescan_ms < ? ORDER BY s.id",
    )?;
    let rows = stmt.query_map([horizon_ms], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?;
    rows.collect()
}

/// Stamp `now` as the last rescan of the given hosts. Run inside a write transaction.
pub fn mark_hosts_rescanned(conn: &Connection, ids: &[HostId], now: i64) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("UPDATE host SET rescan_ms = ? WHERE id = ?")?;
    for id in ids {
        stmt.execute(params![now, id])?;
    }
    Ok(())
}

pub fn mark_services_rescanned(conn: &Connection, ids: &[ServiceId], now: i64) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("UPDATE service SET rescan_ms = ? WHERE id = ?")?;
    for id in ids {
        stmt.execute(params![now, id])?;
    }
    Ok(())
}

/// `(proto, address, port)` of open services on one of `ports` or named one of `names`.
pub fn services_matching(conn: &Connection, ports: &[u16], names: &[String]) -> rusqlite::Result<Vec<(String, String, u16)>> {
    let mut stmt = conn.prepare(
        "SELECT s.proto, h.address, s.port, s.name FROM service s JOIN host h ON h.id = s.host_id
         WHERE s.state LIKE 'open%' ORDER BY h.address, s.port",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, u16>(2)?, r.get::<_, Option<String>>(3)?)))?;
    let mut out = Vec::new();
    for row in rows {
        let (proto, address, port, name) = row?;
        let named = name.map(|n| names.contains(&n)).unwrap_or(false);
        if ports.contains(&port) || named {
            out.push((proto, address, port));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{count_rows, Db};

    fn db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open_or_create(dir.path().join("t.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn host_upsert_is_keyed_by_address() {
        let (_d, db) = db();
        let a = upsert_host(&db.conn, "10.0.0.1", None, None, 1).unwrap();
        let b = upsert_host(&db.conn, "10.0.0.1", Some("box"), None, 2).unwrap();
        let c = upsert_host(&db.conn, "10.0.0.1", None, None, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        let hostname: Option<String> = db.conn.query_row("SELECT hostname FROM host", [], |r| r.get(0)).unwrap();
        assert_eq!(hostname.as_deref(), Some("box"));
        let modified: i64 = db.conn.query_row("SELECT modified_ms FROM host", [], |r| r.get(0)).unwrap();
        assert_eq!(modified, 2);
    }

    #[test]
    fn note_upsert_treats_null_keys_as_equal() {
        let (_d, db) = db();
        let host_id = upsert_host(&db.conn, "10.0.0.1", None, None, 1).unwrap();
        let key = AnnotationKey { host_id, service_id: None, via_target: None, xtype: "hostnames".into() };
        let a = upsert_note(&db.conn, &key, "a").unwrap();
        let b = upsert_note(&db.conn, &key, "b").unwrap();
        assert_eq!(a, b);
        assert_eq!(count_rows(&db.conn, "note").unwrap(), 1);
    }

    #[test]
    fn prune_keeps_other_families() {
        let (_d, db) = db();
        let host_id = upsert_host(&db.conn, "10.0.0.1", None, None, 1).unwrap();
        let key = |x: &str| AnnotationKey { host_id, service_id: None, via_target: None, xtype: x.into() };
        let fields = VulnFields { name: "v".into(), ..Default::default() };
        upsert_vuln(&db.conn, &key("rolling.old"), &fields).unwrap();
        upsert_vuln(&db.conn, &key("rolling.new"), &fields).unwrap();
        upsert_vuln(&db.conn, &key("manual"), &fields).unwrap();
        let keep: HashSet<_> = [key("rolling.new")].into_iter().collect();
        assert_eq!(prune_vulns(&db.conn, host_id, "rolling.", &keep).unwrap(), 1);
        assert_eq!(count_rows(&db.conn, "vuln").unwrap(), 2);
    }

    #[test]
    fn rescan_selection_and_stamp() {
        let (_d, mut db) = db();
        let host_id = upsert_host(&db.conn, "10.0.0.1", None, None, 1).unwrap();
        let service_id = upsert_service(&db.conn, host_id, "tcp", 22, "open:syn-ack", None, None).unwrap();
        assert_eq!(hosts_due_for_rescan(&db.conn, 100).unwrap(), vec![(host_id, "10.0.0.1".to_string())]);
        assert_eq!(
            services_due_for_rescan(&db.conn, 100).unwrap(),
            vec![(service_id, "tcp".to_string(), "10.0.0.1".to_string(), 22u16)]
        );
        // selecting alone does not stamp
        assert_eq!(hosts_due_for_rescan(&db.conn, 100).unwrap().len(), 1);

        let tx = db.immediate().unwrap();
        mark_hosts_rescanned(&tx, &[host_id], 100).unwrap();
        mark_services_rescanned(&tx, &[service_id], 100).unwrap();
        tx.commit().unwrap();
        assert!(hosts_due_for_rescan(&db.conn, 100).unwrap().is_empty());
        assert!(services_due_for_rescan(&db.conn, 100).unwrap().is_empty());
        assert_eq!(hosts_due_for_rescan(&db.conn, 101).unwrap().len(), 1);
    }

    #[test]
    fn matching_services_by_port_or_name() {
        let (_d, db) = db();
        let host_id = upsert_host(&db.conn, "10.0.0.1", None, None, 1).unwrap();
        upsert_service(&db.conn, host_id, "tcp", 443, "open", None, None).unwrap();
        upsert_service(&db.conn, host_id, "tcp", 8443, "open", Some("https"), None).unwrap();
        upsert_service(&db.conn, host_id, "tcp", 22, "open", Some("ssh"), None).unwrap();
        upsert_service(&db.conn, host_id, "tcp", 9443, "closed", Some("https"), None).unwrap();
        let found = services_matching(&db.conn, &[443], &["https".to_string()]).unwrap();
        let ports: Vec<u16> = found.iter().map(|s| s.2).collect();
        assert_eq!(ports, vec![443, 8443]);
    }
}
