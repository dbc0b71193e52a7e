//! Stage traits, the built-in sinks and the lock-protected scheduling wrapper.

use crate::context::Context;
use crate::error::Result;
use crate::lock::{self, Lease};
use scanfleet_store::now_ms;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level pipeline unit, run once per planner tick.
pub trait Stage: Send {
    fn name(&self) -> &str;
    fn run(&mut self, ctx: &mut Context) -> Result<()>;
}

/// Sink receiving a list of targets from an upstream stage.
pub trait TaskStage: Send {
    fn task(&mut self, ctx: &mut Context, data: Vec<String>) -> Result<()>;
}

pub type Sinks = Vec<Box<dyn TaskStage>>;

/// Hand `data` to every sink.
pub fn forward(ctx: &mut Context, sinks: &mut [Box<dyn TaskStage>], data: &[String]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    for sink in sinks.iter_mut() {
        sink.task(ctx, data.to_vec())?;
    }
    Ok(())
}

/// Push targets into a scheduler queue; exclusions apply.
pub struct Enqueue {
    pub queue: String,
}

impl Enqueue {
    pub fn new(queue: impl Into<String>) -> Self {
        Self { queue: queue.into() }
    }
}

impl TaskStage for Enqueue {
    fn task(&mut self, ctx: &mut Context, data: Vec<String>) -> Result<()> {
        let scheduler = ctx.scheduler.clone();
        scheduler.queue_enqueue(&mut ctx.db, &self.queue, &data)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DummyRecord {
    count: usize,
    args: Vec<String>,
}

/// Records how often it was called and with what; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct DummyStage {
    record: Arc<Mutex<DummyRecord>>,
}

impl DummyStage {
    pub fn task_count(&self) -> usize {
        self.record.lock().map(|r| r.count).unwrap_or_default()
    }

    pub fn task_args(&self) -> Vec<String> {
        self.record.lock().map(|r| r.args.clone()).unwrap_or_default()
    }
}

impl TaskStage for DummyStage {
    fn task(&mut self, _ctx: &mut Context, data: Vec<String>) -> Result<()> {
        if let Ok(mut record) = self.record.lock() {
            record.count += 1;
            record.args.extend(data);
        }
        Ok(())
    }
}

impl Stage for DummyStage {
    fn name(&self) -> &str {
        "dummy"
    }

    fn run(&mut self, _ctx: &mut Context) -> Result<()> {
        if let Ok(mut record) = self.record.lock() {
            record.count += 1;
        }
        Ok(())
    }
}

/// Runs `inner` at most once per `interval` across every planner sharing the database.
pub struct Schedule<S> {
    pub lockname: String,
    pub interval: Duration,
    pub inner: S,
}

impl<S: Stage> Schedule<S> {
    pub fn new(lockname: impl Into<String>, interval: Duration, inner: S) -> Self {
        Self { lockname: lockname.into(), interval, inner }
    }
}

impl<S: Stage> Stage for Schedule<S> {
    fn name(&self) -> &str {
        &self.lockname
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        let now = now_ms();
        let last_run = match lock::acquire(&mut ctx.db, &self.lockname, &ctx.holder, ctx.lock_ttl, now)? {
            Lease::Busy => return Ok(()),
            Lease::Acquired { last_run_ms } => last_run_ms,
        };

        let due = last_run.map_or(true, |last| now - last >= self.interval.as_millis() as i64);
        let result = if due {
            debug!(stage = %self.lockname, "stage due");
            self.inner.run(ctx)
        } else {
            Ok(())
        };

        let ran_at = (due && result.is_ok()).then_some(now);
        lock::release(&ctx.db, &self.lockname, &ctx.holder, ran_at)?;
        if ran_at.is_some() {
            info!(stage = %self.lockname, "stage finished");
        }
        result
    }
}

impl Stage for Box<dyn Stage> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn run(&mut self, ctx: &mut Context) -> Result<()> {
        self.as_mut().run(ctx)
    }
}
