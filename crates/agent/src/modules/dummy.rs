use super::{write_results, AgentModule, ModuleLog};
use async_trait::async_trait;
use scanfleet_core::{Assignment, ParsedResults};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Echoes its targets back as hosts. `delay_ms` keeps it busy, `retval` picks the return code.
#[derive(Debug, Default)]
pub struct Dummy {
    cancel: CancellationToken,
}

#[async_trait]
impl AgentModule for Dummy {
    async fn run(&self, assignment: &Assignment, workdir: &Path) -> anyhow::Result<i32> {
        let mut log = ModuleLog::create(workdir, "dummy")?;
        log.line(format!("args: {}", assignment.config.get_str("args").unwrap_or_default()))?;
        if let Some(delay) = assignment.config.get_u64("delay_ms") {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log.line("terminated")?;
                    return Ok(1);
                }
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }
        let mut results = ParsedResults::default();
        for target in &assignment.targets {
            log.line(target)?;
            results.add_host(target);
        }
        write_results(workdir, &results)?;
        Ok(assignment.config.get_u64("retval").map_or(0, |v| v as i32))
    }

    fn terminate(&self) {
        self.cancel.cancel();
    }
}
