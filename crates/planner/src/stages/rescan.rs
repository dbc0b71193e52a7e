use crate::context::Context;
use crate::error::Result;
use crate::stage::{forward, Sinks, Stage};
use scanfleet_core::target::service_target;
use scanfleet_store::{hosts_due_for_rescan, mark_hosts_rescanned, mark_services_rescanned, now_ms, services_due_for_rescan};
use std::time::Duration;
use tracing::info;

/// Re-feeds hosts and services that were not scanned within their horizon.
pub struct StorageRescan {
    pub host_interval: Duration,
    pub service_interval: Duration,
    /// Receives host addresses.
    pub servicedisco: Sinks,
    /// Receive `proto://addr:port` service targets.
    pub servicescan: Sinks,
}

impl Stage for StorageRescan {
    fn name(&self) -> &str {
        "storage_rescan"
    }

    /// Targets are stamped only after every sink took them, so a failing sink
    /// leaves them due for the next run.
    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let now = now_ms();
        let (host_ids, hosts): (Vec<_>, Vec<_>) =
            hosts_due_for_rescan(&ctx.db.conn, now - self.host_interval.as_millis() as i64)?.into_iter().unzip();
        let (service_ids, services): (Vec<_>, Vec<_>) =
            services_due_for_rescan(&ctx.db.conn, now - self.service_interval.as_millis() as i64)?
                .into_iter()
                .map(|(id, proto, address, port)| (id, service_target(&proto, &address, port)))
                .unzip();
        info!(hosts = hosts.len(), services = services.len(), "rescan targets selected");

        forward(ctx, &mut self.servicedisco, &hosts)?;
        forward(ctx, &mut self.servicescan, &services)?;

        let tx = ctx.db.immediate()?;
        mark_hosts_rescanned(&tx, &host_ids, now)?;
        mark_services_rescanned(&tx, &service_ids, now)?;
        tx.commit()?;
        Ok(())
    }
}
