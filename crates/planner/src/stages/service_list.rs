use crate::context::Context;
use crate::error::Result;
use crate::stage::{forward, Sinks, Stage};
use scanfleet_core::target::service_target;
use scanfleet_store::services_matching;

/// Forwards stored open services matching a port or service name list, e.g. to a TLS scanner.
pub struct StorageServiceList {
    pub ports: Vec<u16>,
    pub names: Vec<String>,
    pub next: Sinks,
}

impl Stage for StorageServiceList {
    fn name(&self) -> &str {
        "storage_service_list"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let targets: Vec<String> = services_matching(&ctx.db.conn, &self.ports, &self.names)?
            .into_iter()
            .map(|(proto, address, port)| service_target(&proto, &address, port))
            .collect();
        forward(ctx, &mut self.next, &targets)
    }
}
