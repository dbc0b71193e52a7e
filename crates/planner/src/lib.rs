//! Planner: a loop of scheduled stages that turns finished jobs and stored
//! findings into new queue targets.

pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod parser;
pub mod pipeline;
pub mod projections;
pub mod queue_handler;
pub mod stage;
pub mod stages;
#[cfg(test)]
mod testutil;

pub use config::PlannerConfig;
pub use context::Context;
pub use error::{PlannerError, Result};
pub use stage::{DummyStage, Enqueue, Schedule, Stage, TaskStage};

use scanfleet_scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Planner {
    ctx: Context,
    stages: Vec<Box<dyn Stage>>,
    loop_sleep: Duration,
}

impl Planner {
    pub fn new(scheduler: Arc<Scheduler>, config: &PlannerConfig) -> Result<Self> {
        let ctx = Context::new(scheduler, config)?;
        let stages = pipeline::build(&ctx, &config.stages, config.tarpit_threshold)?;
        Ok(Self { ctx, stages, loop_sleep: config.loop_sleep })
    }

    pub fn with_stages(ctx: Context, stages: Vec<Box<dyn Stage>>, loop_sleep: Duration) -> Self {
        Self { ctx, stages, loop_sleep }
    }

    /// Run every stage once. A failing stage is logged and does not stop the others.
    pub fn tick(&mut self) -> usize {
        let mut failed = 0;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.run(&mut self.ctx) {
                failed += 1;
                error!(stage = %stage.name(), error = %e, "stage failed");
            }
        }
        failed
    }

    /// Tick until `shutdown` fires, or once with `oneshot`.
    pub async fn run(mut self, oneshot: bool, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(stages = self.stages.len(), oneshot, "planner started");
        loop {
            let (planner, failed) = tokio::task::spawn_blocking(move || {
                let failed = self.tick();
                (self, failed)
            })
            .await?;
            self = planner;
            if oneshot {
                if failed > 0 {
                    anyhow::bail!("{failed} stage(s) failed");
                }
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.loop_sleep) => {}
            }
        }
        info!("planner stopped");
        Ok(())
    }
}
