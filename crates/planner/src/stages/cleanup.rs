use crate::context::Context;
use crate::error::Result;
use crate::stage::Stage;
use scanfleet_store::{delete_empty_hosts, delete_non_open_services};
use tracing::info;

/// Removes closed/filtered services and hosts left with nothing worth keeping.
pub struct StorageCleanup;

impl Stage for StorageCleanup {
    fn name(&self) -> &str {
        "storage_cleanup"
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let tx = ctx.db.immediate()?;
        // services first: a host stripped of them may become empty
        let services = delete_non_open_services(&tx)?;
        let hosts = delete_empty_hosts(&tx)?;
        tx.commit()?;
        info!(services, hosts, "storage cleaned up");
        Ok(())
    }
}
