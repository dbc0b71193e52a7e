use super::{config_millis, config_ports, write_results, AgentModule, ModuleLog};
use async_trait::async_trait;
use port_scan::{default_top_ports, scan_host, ScanOptions};
use scanfleet_core::ratelimiter::RateLimiter;
use scanfleet_core::results::ParsedService;
use scanfleet_core::{Assignment, ParsedResults, Target};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// TCP connect scan of `host` targets (configured ports) and `tcp://host:port` targets (that port).
#[derive(Debug, Default)]
pub struct PortScan {
    cancel: CancellationToken,
}

/// Host and optional explicit port of a target; `None` for targets this module cannot scan.
fn split_target(target: &str) -> Option<(String, Option<u16>)> {
    let host = Target::from(target).host();
    match target.split_once("://") {
        None => Some((host, None)),
        Some(("tcp", rest)) => {
            let port = rest.rsplit_once(':')?.1.parse().ok()?;
            Some((host, Some(port)))
        }
        Some(_) => None,
    }
}

#[async_trait]
impl AgentModule for PortScan {
    async fn run(&self, assignment: &Assignment, workdir: &Path) -> anyhow::Result<i32> {
        let config = &assignment.config;
        let mut log = ModuleLog::create(workdir, "portscan")?;
        let ports = config_ports(config, default_top_ports())?;
        let opts = ScanOptions {
            timeout: config_millis(config, "timeout_ms", 1000),
            concurrency: config.get_u64("concurrency").map_or(64, |v| v as usize),
            retries: config.get_u64("retries").map_or(0, |v| v as u32),
            ..Default::default()
        };
        let pacing = RateLimiter::optional(config.get_u64("qps").map_or(0, |v| v as u32)).map(Arc::new);

        // host -> explicit ports; an empty set means the configured port list
        let mut plan: BTreeMap<String, BTreeSet<u16>> = BTreeMap::new();
        let mut whole_hosts: BTreeSet<String> = BTreeSet::new();
        for target in &assignment.targets {
            match split_target(target) {
                Some((host, Some(port))) => {
                    plan.entry(host).or_default().insert(port);
                }
                Some((host, None)) => {
                    whole_hosts.insert(host.clone());
                    plan.entry(host).or_default();
                }
                None => log.line(format!("skipping unsupported target {target}"))?,
            }
        }

        let mut results = ParsedResults::default();
        let mut retval = 0;
        for (host, explicit) in plan {
            if self.cancel.is_cancelled() {
                log.line("terminated")?;
                retval = 1;
                break;
            }
            let mut scan_ports: Vec<u16> = explicit.into_iter().collect();
            if whole_hosts.contains(&host) {
                scan_ports.extend(&ports);
                scan_ports.sort_unstable();
                scan_ports.dedup();
            }
            let open = scan_host(&host, &scan_ports, &opts, pacing.clone(), &self.cancel).await;
            log.line(format!("{host}: scanned {} ports, open {:?}", scan_ports.len(), open))?;
            if open.is_empty() {
                continue;
            }
            results.add_host(&host);
            results.services.extend(open.into_iter().map(|port| ParsedService {
                address: host.clone(),
                proto: "tcp".into(),
                port,
                state: "open:connect".into(),
                ..Default::default()
            }));
        }
        write_results(workdir, &results)?;
        Ok(retval)
    }

    fn terminate(&self) {
        self.cancel.cancel();
    }
}
