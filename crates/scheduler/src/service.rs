use crate::error::{Result, SchedulerError};
use crate::heatmap::{self, HeatmapPolicy};
use crate::queue::{eligible_queues, lookup_queue};
use rusqlite::{params, Connection, OptionalExtension};
use scanfleet_core::exclusions::{ExclusionMatcher, ExclusionRule};
use scanfleet_core::target::hashval;
use scanfleet_core::{is_job_id, Assignment, AssignmentConfig, OutputUpload};
use scanfleet_store::{now_ms, Db, Job, Queue, TargetRow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Return code stored on jobs closed by [`Scheduler::reconcile`].
pub const RETVAL_RECONCILED: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub db: PathBuf,
    /// Directory holding one output archive per finished job.
    pub output_dir: PathBuf,
    pub heatmap: HeatmapPolicy,
    pub exclusions: Vec<ExclusionRule>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("scanfleet.db"),
            output_dir: PathBuf::from("output"),
            heatmap: HeatmapPolicy::default(),
            exclusions: Vec::new(),
        }
    }
}

/// What an agent asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignRequest {
    /// Pin a queue by numeric id or by name.
    pub queue: Option<String>,
    /// Upper bound on top of the queue's own group size.
    pub group_size: Option<usize>,
    pub caps: Vec<String>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    exclusions: ExclusionMatcher,
}

impl Scheduler {
    /// Validate the config, create the output directory and bring the schema up to date.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let exclusions = ExclusionMatcher::new(&config.exclusions)?;
        std::fs::create_dir_all(&config.output_dir)?;
        Db::open_or_create(&config.db)?;
        Ok(Self { config, exclusions })
    }

    /// Fresh connection for one unit of work.
    pub fn connect(&self) -> Result<Db> {
        Ok(Db::open(&self.config.db)?)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub(crate) fn exclusions(&self) -> &ExclusionMatcher {
        &self.exclusions
    }

    /// Pop up to one group of targets into a new job.
    ///
    /// Runs in a single IMMEDIATE transaction: queue selection, the target pop,
    /// the job insert and the heatmap increments commit together, and concurrent
    /// callers (in any process) are serialized on the database write lock.
    pub fn assign(&self, db: &mut Db, req: &AssignRequest) -> Result<Option<Assignment>> {
        let now = now_ms();
        let tx = db.immediate()?;

        let queues = match req.queue.as_deref() {
            Some(ident) => match lookup_queue(&tx, ident)? {
                Some(queue) if queue.active => vec![queue],
                Some(_) => {
                    warn!(queue = %ident, "requested queue is not active");
                    return Ok(None);
                }
                None => {
                    warn!(queue = %ident, "requested queue does not exist");
                    return Ok(None);
                }
            },
            None => eligible_queues(&tx, &req.caps)?,
        };

        for queue in queues {
            let mut limit = queue.group_size.max(0) as usize;
            if let Some(requested) = req.group_size {
                limit = limit.min(requested);
            }
            if limit == 0 {
                continue;
            }
            let picked = self.pick_targets(&tx, &queue, limit, now)?;
            if picked.is_empty() {
                debug!(queue = %queue.name, "no admissible targets");
                continue;
            }

            let config = AssignmentConfig::from_json(&queue.config)
                .map_err(|e| anyhow::anyhow!("queue {} has an invalid config: {e}", queue.name))?;
            let assignment = Assignment::new(config, picked.iter().map(|t| t.target.clone()).collect());
            tx.execute(
                "INSERT INTO job(id, queue_id, assignment, time_start) VALUES (?, ?, ?, ?)",
                params![assignment.id, queue.id, serde_json::to_string(&assignment)?, now],
            )?;
            {
                let mut delete = tx.prepare("DELETE FROM target WHERE id = ?")?;
                for target in &picked {
                    delete.execute([target.id])?;
                    heatmap::touch(&tx, &self.config.heatmap, &target.hashval, 1, now)?;
                }
            }
            tx.commit()?;
            info!(job_id = %assignment.id, queue = %queue.name, count = picked.len(), "job assigned");
            return Ok(Some(assignment));
        }
        Ok(None)
    }

    fn pick_targets(&self, conn: &Connection, queue: &Queue, limit: usize, now: i64) -> Result<Vec<TargetRow>> {
        let policy = &self.config.heatmap;
        let mut stmt = conn.prepare("SELECT id, queue_id, target, hashval FROM target WHERE queue_id = ? ORDER BY random()")?;
        let mut rows = stmt.query([queue.id])?;
        let mut picked = Vec::with_capacity(limit);
        // increments this batch would add on top of the stored counters
        let mut pending: HashMap<String, i64> = HashMap::new();
        while let Some(row) = rows.next()? {
            let target = TargetRow { id: row.get(0)?, queue_id: row.get(1)?, target: row.get(2)?, hashval: row.get(3)? };
            let extra = pending.get(&target.hashval).copied().unwrap_or(0);
            if policy.is_hot(heatmap::heat(conn, policy, &target.hashval, now)? + extra) {
                continue;
            }
            *pending.entry(target.hashval.clone()).or_default() += 1;
            picked.push(target);
            if picked.len() == limit {
                break;
            }
        }
        Ok(picked)
    }

    /// Store an uploaded archive and close the job.
    ///
    /// Unknown jobs are `NotFound`, already finished ones `InvalidState`; either way
    /// the stored result of the job is left as it was.
    pub fn receive_output(&self, db: &mut Db, upload: &OutputUpload) -> Result<()> {
        let data = upload.decode_output()?;
        if !is_job_id(&upload.id) {
            return Err(SchedulerError::job_not_found(&upload.id));
        }

        let mut blob = tempfile::NamedTempFile::new_in(self.output_dir())?;
        blob.write_all(&data)?;
        blob.as_file().sync_all()?;

        let tx = db.immediate()?;
        let job = get_job(&tx, &upload.id)?.ok_or_else(|| SchedulerError::job_not_found(&upload.id))?;
        if job.is_finished() {
            return Err(SchedulerError::InvalidState(format!("job {} already finished", job.id)));
        }
        let dest = self.output_dir().join(&job.id);
        tx.execute(
            "UPDATE job SET retval = ?, time_end = ?, output = ? WHERE id = ?",
            params![upload.retval, now_ms(), dest.to_string_lossy(), job.id],
        )?;
        blob.persist(&dest).map_err(|e| e.error)?;
        if let Err(e) = tx.commit() {
            if let Err(rm) = remove_output(&dest) {
                warn!(job_id = %job.id, error = %rm, "failed to remove uncommitted output");
            }
            return Err(e.into());
        }
        info!(job_id = %job.id, retval = upload.retval, bytes = data.len(), "job output received");
        Ok(())
    }

    /// Close a job whose agent never reported back and give its heat back.
    pub fn reconcile(&self, db: &mut Db, job_id: &str) -> Result<()> {
        let now = now_ms();
        let tx = db.immediate()?;
        let job = get_job(&tx, job_id)?.ok_or_else(|| SchedulerError::job_not_found(job_id))?;
        if job.is_finished() {
            return Err(SchedulerError::InvalidState(format!("job {job_id} already finished")));
        }
        tx.execute(
            "UPDATE job SET retval = ?, time_end = ? WHERE id = ?",
            params![RETVAL_RECONCILED, now, job.id],
        )?;
        for target in job_targets(&job)? {
            heatmap::touch(&tx, &self.config.heatmap, &hashval(&target), -1, now)?;
        }
        tx.commit()?;
        info!(job_id = %job_id, "job reconciled");
        Ok(())
    }

    /// Put the targets of a job back into its queue. The job itself is untouched.
    pub fn repeat(&self, db: &mut Db, job_id: &str) -> Result<usize> {
        let tx = db.immediate()?;
        let job = get_job(&tx, job_id)?.ok_or_else(|| SchedulerError::job_not_found(job_id))?;
        let targets = job_targets(&job)?;
        {
            let mut insert = tx.prepare("INSERT INTO target(queue_id, target, hashval) VALUES (?, ?, ?)")?;
            for target in &targets {
                insert.execute(params![job.queue_id, target, hashval(target)])?;
            }
        }
        tx.commit()?;
        info!(job_id = %job_id, count = targets.len(), "job targets requeued");
        Ok(targets.len())
    }

    /// Delete a job and its output archive.
    pub fn job_delete(&self, db: &mut Db, job_id: &str) -> Result<()> {
        let tx = db.immediate()?;
        let job = get_job(&tx, job_id)?.ok_or_else(|| SchedulerError::job_not_found(job_id))?;
        tx.execute("DELETE FROM job WHERE id = ?", [&job.id])?;
        tx.commit()?;
        if let Some(output) = &job.output {
            remove_output(Path::new(output))?;
        }
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    pub fn job_get(&self, db: &Db, job_id: &str) -> Result<Job> {
        get_job(&db.conn, job_id)?.ok_or_else(|| SchedulerError::job_not_found(job_id))
    }

    /// Effective heat of every hash that currently has any.
    pub fn heatmap_check(&self, db: &Db) -> Result<BTreeMap<String, i64>> {
        Ok(heatmap::snapshot(&db.conn, &self.config.heatmap, now_ms())?)
    }
}

pub(crate) fn get_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<Job>> {
    conn.query_row(&format!("SELECT {} FROM job WHERE id = ?", Job::COLUMNS), [job_id], Job::from_row)
        .optional()
}

fn job_targets(job: &Job) -> Result<Vec<String>> {
    Ok(Assignment::from_json(&job.assignment)?.targets)
}

/// Job ids end up as file names in the output directory.
pub(crate) fn remove_output(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
