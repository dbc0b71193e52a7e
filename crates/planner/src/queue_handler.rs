use crate::context::Context;
use crate::error::{PlannerError, Result};
use crate::lock::{self, Lease};
use rusqlite::params;
use scanfleet_core::{Assignment, ParsedResults};
use scanfleet_scheduler::queue::lookup_queue;
use scanfleet_store::{now_ms, Job, QueueId};
use std::path::Path;
use tracing::{debug, info, warn};

/// Return code given to finished jobs whose output could not be parsed.
pub const RETVAL_UNPARSEABLE: i32 = 1000;

/// Drains successfully finished jobs of one queue into a stage.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    queue_name: String,
    queue_id: QueueId,
}

impl QueueHandler {
    pub fn new(ctx: &Context, queue_name: &str) -> Result<Self> {
        let queue = lookup_queue(&ctx.db.conn, queue_name)?.ok_or_else(|| PlannerError::QueueNotFound(queue_name.to_string()))?;
        Ok(Self { queue_name: queue.name, queue_id: queue.id })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Stage lock serializing the handlers of this queue across planners.
    pub fn lockname(&self) -> String {
        format!("queue_handler:{}", self.queue_name)
    }

    fn finished_jobs(&self, ctx: &Context) -> Result<Vec<Job>> {
        let mut stmt = ctx.db.conn.prepare(&format!(
            "SELECT {} FROM job WHERE queue_id = ? AND retval = 0 ORDER BY time_end, id",
            Job::COLUMNS
        ))?;
        let jobs = stmt.query_map([self.queue_id], Job::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Hand every parsed job to `handle`, archive its output and delete it.
    ///
    /// Jobs of modules without a parser are left alone; jobs whose output cannot be
    /// parsed are kept and marked with [`RETVAL_UNPARSEABLE`]. Returns the number of
    /// jobs consumed.
    /// Another planner draining the same queue makes this a no-op.
    pub fn drain<F>(&self, ctx: &mut Context, mut handle: F) -> Result<usize>
    where
        F: FnMut(&mut Context, &Job, ParsedResults) -> Result<()>,
    {
        let lockname = self.lockname();
        if lock::acquire(&mut ctx.db, &lockname, &ctx.holder, ctx.lock_ttl, now_ms())? == Lease::Busy {
            debug!(queue = %self.queue_name, "queue drained by another planner");
            return Ok(0);
        }
        let result = self.drain_locked(ctx, &mut handle);
        let ran_at = result.is_ok().then(now_ms);
        lock::release(&ctx.db, &lockname, &ctx.holder, ran_at)?;
        result
    }

    fn drain_locked<F>(&self, ctx: &mut Context, handle: &mut F) -> Result<usize>
    where
        F: FnMut(&mut Context, &Job, ParsedResults) -> Result<()>,
    {
        let mut consumed = 0;
        for job in self.finished_jobs(ctx)? {
            let parsed = match Assignment::from_json(&job.assignment) {
                Ok(assignment) => match ctx.parsers.get(&assignment.config.module) {
                    Some(parser) => match &job.output {
                        Some(output) => parser.parse_job(Path::new(output)),
                        None => Err(PlannerError::Parse("job has no output".into())),
                    },
                    None => {
                        debug!(job_id = %job.id, module = %assignment.config.module, "no parser for module");
                        continue;
                    }
                },
                Err(e) => Err(PlannerError::Parse(e.to_string())),
            };
            let results = match parsed {
                Ok(results) => results,
                Err(e) => {
                    warn!(job_id = %job.id, queue = %self.queue_name, error = %e, "job output unusable");
                    ctx.db.conn.execute("UPDATE job SET retval = ? WHERE id = ?", params![RETVAL_UNPARSEABLE, job.id])?;
                    continue;
                }
            };

            self.archive(ctx, &job)?;
            handle(ctx, &job, results)?;
            let scheduler = ctx.scheduler.clone();
            scheduler.job_delete(&mut ctx.db, &job.id)?;
            consumed += 1;
        }
        if consumed > 0 {
            info!(queue = %self.queue_name, count = consumed, "finished jobs processed");
        }
        Ok(consumed)
    }

    fn archive(&self, ctx: &Context, job: &Job) -> Result<()> {
        if let Some(output) = &job.output {
            let dir = ctx.archive_dir.join(self.queue_name.replace('/', "_"));
            std::fs::create_dir_all(&dir)?;
            std::fs::copy(output, dir.join(format!("{}.zip", job.id)))?;
        }
        Ok(())
    }
}
