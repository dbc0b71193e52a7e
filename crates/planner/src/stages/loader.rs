use crate::context::Context;
use crate::error::Result;
use crate::queue_handler::QueueHandler;
use crate::stage::Stage;
use rusqlite::Connection;
use scanfleet_core::results::Endpoint;
use scanfleet_core::{Assignment, ParsedResults, Target};
use scanfleet_store::{
    host_id_by_address, now_ms, prune_vulns, service_id_by_key, upsert_host, upsert_note, upsert_service,
    upsert_vuln, AnnotationKey, HostId, ServiceId, VulnFields,
};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// State given to services that only appear as the endpoint of a note or vuln.
const IMPLIED_SERVICE_STATE: &str = "open:implied";

fn endpoint_ids(conn: &Connection, endpoint: &Endpoint, now: i64) -> rusqlite::Result<(HostId, Option<ServiceId>)> {
    let host_id = upsert_host(conn, &endpoint.address, None, None, now)?;
    let service_id = match (&endpoint.proto, endpoint.port) {
        (Some(proto), Some(port)) => match service_id_by_key(conn, host_id, proto, port)? {
            Some(id) => Some(id),
            None => Some(upsert_service(conn, host_id, proto, port, IMPLIED_SERVICE_STATE, None, None)?),
        },
        _ => None,
    };
    Ok((host_id, service_id))
}

/// Merge parsed results into storage by natural key. Returns the keys of every vuln written.
pub fn import_results(conn: &Connection, results: &ParsedResults, now: i64) -> rusqlite::Result<HashSet<AnnotationKey>> {
    for host in &results.hosts {
        upsert_host(conn, &host.address, host.hostname.as_deref(), host.os.as_deref(), now)?;
    }
    for service in &results.services {
        let host_id = upsert_host(conn, &service.address, None, None, now)?;
        upsert_service(
            conn,
            host_id,
            &service.proto,
            service.port,
            &service.state,
            service.name.as_deref(),
            service.info.as_deref(),
        )?;
    }
    for note in &results.notes {
        let (host_id, service_id) = endpoint_ids(conn, &note.endpoint, now)?;
        let key = AnnotationKey { host_id, service_id, via_target: note.via_target.clone(), xtype: note.xtype.clone() };
        upsert_note(conn, &key, &note.data)?;
    }
    let mut vulns = HashSet::new();
    for vuln in &results.vulns {
        let (host_id, service_id) = endpoint_ids(conn, &vuln.endpoint, now)?;
        let key = AnnotationKey { host_id, service_id, via_target: vuln.via_target.clone(), xtype: vuln.xtype.clone() };
        let fields = VulnFields {
            name: vuln.name.clone(),
            severity: vuln.severity.clone(),
            descr: vuln.descr.clone(),
            data: vuln.data.clone(),
            refs: vuln.refs.clone(),
        };
        upsert_vuln(conn, &key, &fields)?;
        vulns.insert(key);
    }
    Ok(vulns)
}

/// Imports finished jobs of a queue into storage.
pub struct StorageLoader {
    pub handler: QueueHandler,
}

impl Stage for StorageLoader {
    fn name(&self) -> &str {
        "storage_loader"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        self.handler.drain(ctx, |ctx, job, results| {
            let tx = ctx.db.immediate()?;
            import_results(&tx, &results, now_ms())?;
            tx.commit()?;
            info!(job_id = %job.id, hosts = results.hosts.len(), services = results.services.len(), "job imported");
            Ok(())
        })?;
        Ok(())
    }
}

/// Loader for scanners that report the complete current finding set of every target they
/// scan: vulns of the `xtype_prefix` family missing from the newest job are retired.
pub struct StorageLoaderRolling {
    pub handler: QueueHandler,
    pub xtype_prefix: String,
}

impl Stage for StorageLoaderRolling {
    fn name(&self) -> &str {
        "storage_loader_rolling"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let prefix = self.xtype_prefix.clone();
        self.handler.drain(ctx, |ctx, job, results| {
            let scanned: HashSet<String> = Assignment::from_json(&job.assignment)
                .map(|a| a.targets.iter().map(|t| Target::from(t.as_str()).host()).collect())
                .unwrap_or_default();

            let tx = ctx.db.immediate()?;
            let written = import_results(&tx, &results, now_ms())?;
            let mut keep: HashMap<HostId, HashSet<AnnotationKey>> = HashMap::new();
            for key in written.into_iter().filter(|k| k.xtype.starts_with(&prefix)) {
                keep.entry(key.host_id).or_default().insert(key);
            }
            let mut pruned = 0;
            for address in &scanned {
                if let Some(host_id) = host_id_by_address(&tx, address)? {
                    let empty = HashSet::new();
                    pruned += prune_vulns(&tx, host_id, &prefix, keep.get(&host_id).unwrap_or(&empty))?;
                }
            }
            tx.commit()?;
            info!(job_id = %job.id, pruned, "rolling job imported");
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestEnv;
    use scanfleet_core::results::{ParsedNote, ParsedService, ParsedVuln};
    use scanfleet_store::{count_rows, list_vulns};

    fn endpoint(address: &str, port: Option<u16>) -> Endpoint {
        Endpoint { address: address.into(), proto: port.map(|_| "tcp".into()), port }
    }

    fn nmap_like() -> ParsedResults {
        let mut results = ParsedResults::default();
        results.hosts.push(scanfleet_core::results::ParsedHost {
            address: "127.0.0.1".into(),
            hostname: Some("localhost".into()),
            os: Some("Linux".into()),
        });
        results.services = [22, 25, 139, 445, 631, 5432]
            .iter()
            .map(|p| ParsedService {
                address: "127.0.0.1".into(),
                proto: "tcp".into(),
                port: *p,
                state: "open:syn-ack".into(),
                ..Default::default()
            })
            .collect();
        results.notes = vec![
            ParsedNote { endpoint: endpoint("127.0.0.1", None), xtype: "hostnames".into(), data: "[\"localhost\"]".into(), ..Default::default() },
            ParsedNote { endpoint: endpoint("127.0.0.1", Some(22)), xtype: "banner".into(), data: "SSH-2.0".into(), ..Default::default() },
            ParsedNote {
                endpoint: endpoint("127.0.0.1", Some(8080)),
                via_target: Some("http://127.0.0.1:8080".into()),
                xtype: "http.title".into(),
                data: "x".into(),
            },
        ];
        results
    }

    #[test]
    fn loader_is_idempotent() {
        let env = TestEnv::new();
        env.create_queue("disco", "portscan");
        env.complete_job("disco", &["127.0.0.1"], &nmap_like());
        env.complete_job("disco", &["127.0.0.1"], &nmap_like());

        let mut ctx = env.context();
        let mut loader = StorageLoader { handler: QueueHandler::new(&ctx, "disco").unwrap() };
        loader.run(&mut ctx).unwrap();

        assert_eq!(count_rows(&ctx.db.conn, "host").unwrap(), 1);
        // six listed plus one implied by the http note
        assert_eq!(count_rows(&ctx.db.conn, "service").unwrap(), 7);
        assert_eq!(count_rows(&ctx.db.conn, "note").unwrap(), 3);
        assert_eq!(count_rows(&ctx.db.conn, "job").unwrap(), 0);
    }

    fn vuln(xtype: &str) -> ParsedVuln {
        ParsedVuln {
            endpoint: endpoint("127.0.0.1", Some(80)),
            via_target: Some("http://127.0.0.1:80".into()),
            xtype: xtype.into(),
            name: xtype.into(),
            severity: "info".into(),
            ..Default::default()
        }
    }

    #[test]
    fn rolling_loader_retires_stale_findings() {
        let env = TestEnv::new();
        env.create_queue("rolling", "dummy");
        let mut ctx = env.context();
        let mut loader = StorageLoaderRolling {
            handler: QueueHandler::new(&ctx, "rolling").unwrap(),
            xtype_prefix: "rolling.".into(),
        };

        let phase1 = ParsedResults { vulns: vec![vuln("rolling.x-frame-options")], ..Default::default() };
        env.complete_job("rolling", &["http://127.0.0.1:80"], &phase1);
        loader.run(&mut ctx).unwrap();
        assert_eq!(list_vulns(&ctx.db.conn, None).unwrap().len(), 1);

        let host_id = host_id_by_address(&ctx.db.conn, "127.0.0.1").unwrap().unwrap();
        let manual = AnnotationKey { host_id, service_id: None, via_target: Some("127.0.0.1".into()), xtype: "dummy".into() };
        upsert_vuln(&ctx.db.conn, &manual, &VulnFields { name: "rolling dummy".into(), ..Default::default() }).unwrap();

        let phase2 = ParsedResults { vulns: vec![vuln("rolling.readme-md")], ..Default::default() };
        env.complete_job("rolling", &["http://127.0.0.1:80"], &phase2);
        loader.run(&mut ctx).unwrap();

        let mut xtypes: Vec<String> = list_vulns(&ctx.db.conn, None).unwrap().into_iter().map(|v| v.xtype).collect();
        xtypes.sort();
        assert_eq!(xtypes, vec!["dummy", "rolling.readme-md"]);
        assert_eq!(count_rows(&ctx.db.conn, "host").unwrap(), 1);
    }
}
