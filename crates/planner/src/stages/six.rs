use crate::context::Context;
use crate::error::Result;
use crate::projections::{filter_external_hosts, project_hosts, project_sixenum_targets};
use crate::queue_handler::QueueHandler;
use crate::stage::{forward, Sinks, Stage};
use ipnet::IpNet;
use scanfleet_store::host_addresses;

/// Turns stored IPv6 hosts into `sixenum://` sweep targets.
pub struct StorageSixTargetlist {
    pub next: Sinks,
}

impl Stage for StorageSixTargetlist {
    fn name(&self) -> &str {
        "storage_six_targetlist"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let addresses = host_addresses(&ctx.db.conn)?;
        let targets = project_sixenum_targets(&addresses);
        forward(ctx, &mut self.next, &targets)
    }
}

/// Consumes finished sixenum jobs and forwards the live addresses inside `filternets`.
pub struct SixDisco {
    pub handler: QueueHandler,
    pub filternets: Vec<IpNet>,
    pub next: Sinks,
}

impl Stage for SixDisco {
    fn name(&self) -> &str {
        "six_disco"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let Self { handler, filternets, next } = self;
        handler.drain(ctx, |ctx, _job, results| {
            let hosts = filter_external_hosts(&project_hosts(&results), filternets.as_slice());
            forward(ctx, next, &hosts)
        })?;
        Ok(())
    }
}
