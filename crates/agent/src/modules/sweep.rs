use super::{config_millis, config_ports, write_results, AgentModule, ModuleLog};
use async_trait::async_trait;
use host_discovery::{discover_hosts, expand_target, SweepOptions};
use scanfleet_core::target::SIXENUM_SCHEME;
use scanfleet_core::{Assignment, ParsedResults};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Liveness sweep over CIDR, address and host name targets.
#[derive(Debug, Default)]
pub struct HostDisco {
    cancel: CancellationToken,
}

/// Liveness sweep over `sixenum://` ranges.
#[derive(Debug, Default)]
pub struct SixEnum {
    cancel: CancellationToken,
}

async fn sweep(
    name: &str,
    assignment: &Assignment,
    workdir: &Path,
    cancel: &CancellationToken,
    accepts: fn(&str) -> bool,
) -> anyhow::Result<i32> {
    let config = &assignment.config;
    let mut log = ModuleLog::create(workdir, name)?;
    let defaults = SweepOptions::default();
    let opts = SweepOptions {
        ports: config_ports(config, defaults.ports)?,
        timeout: config_millis(config, "timeout_ms", defaults.timeout.as_millis() as u64),
        concurrency: config.get_u64("concurrency").map_or(defaults.concurrency, |v| v as usize),
        qps: config.get_u64("qps").map_or(defaults.qps, |v| v as u32),
    };

    let mut ips = Vec::new();
    let mut retval = 0;
    for target in &assignment.targets {
        if !accepts(target) {
            log.line(format!("skipping unsupported target {target}"))?;
            continue;
        }
        match expand_target(target) {
            Ok(expanded) => ips.extend(expanded),
            Err(e) => {
                log.line(format!("cannot expand {target}: {e}"))?;
                retval = 1;
            }
        }
    }
    log.line(format!("sweeping {} addresses on ports {:?}", ips.len(), opts.ports))?;

    let live = discover_hosts(ips, &opts, cancel).await;
    let mut results = ParsedResults::default();
    for ip in &live {
        log.line(format!("live {ip}"))?;
        results.add_host(&ip.to_string());
    }
    write_results(workdir, &results)?;
    if cancel.is_cancelled() {
        log.line("terminated")?;
        retval = 1;
    }
    Ok(retval)
}

#[async_trait]
impl AgentModule for HostDisco {
    async fn run(&self, assignment: &Assignment, workdir: &Path) -> anyhow::Result<i32> {
        sweep("hostdisco", assignment, workdir, &self.cancel, |t| !t.contains("://")).await
    }

    fn terminate(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl AgentModule for SixEnum {
    async fn run(&self, assignment: &Assignment, workdir: &Path) -> anyhow::Result<i32> {
        sweep("sixenum", assignment, workdir, &self.cancel, |t| t.starts_with(SIXENUM_SCHEME)).await
    }

    fn terminate(&self) {
        self.cancel.cancel();
    }
}
