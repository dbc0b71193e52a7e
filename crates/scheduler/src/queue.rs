//! Queue administration: creation, lookup, bulk enqueue, flush and prune.

use crate::error::{Result, SchedulerError};
use crate::service::{remove_output, Scheduler};
use rusqlite::{params, Connection, OptionalExtension};
use scanfleet_core::target::hashval;
use scanfleet_core::AssignmentConfig;
use scanfleet_store::{Db, NewQueue, Queue};
use tracing::info;

/// Find a queue by numeric id or by name.
pub fn lookup_queue(conn: &Connection, ident: &str) -> rusqlite::Result<Option<Queue>> {
    match ident.parse::<i64>() {
        Ok(id) => conn
            .query_row(&format!("SELECT {} FROM queue WHERE id = ?", Queue::COLUMNS), [id], Queue::from_row)
            .optional(),
        Err(_) => conn
            .query_row(&format!("SELECT {} FROM queue WHERE name = ?", Queue::COLUMNS), [ident], Queue::from_row)
            .optional(),
    }
}

/// Active queues that still hold targets and whose requirements `caps` covers, best first.
pub fn eligible_queues(conn: &Connection, caps: &[String]) -> rusqlite::Result<Vec<Queue>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM queue WHERE active = 1
           AND EXISTS (SELECT 1 FROM target t WHERE t.queue_id = queue.id)
         ORDER BY priority DESC, id",
        Queue::COLUMNS
    ))?;
    let queues = stmt.query_map([], Queue::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(queues.into_iter().filter(|q| q.accepts_caps(caps)).collect())
}

impl Scheduler {
    pub fn queue_create(&self, db: &mut Db, queue: &NewQueue) -> Result<Queue> {
        AssignmentConfig::from_json(&queue.config)?;
        if queue.group_size <= 0 {
            return Err(SchedulerError::InvalidState("group_size must be positive".into()));
        }
        if queue.name.trim().is_empty() || queue.name.parse::<i64>().is_ok() {
            return Err(SchedulerError::InvalidState(format!("invalid queue name {:?}", queue.name)));
        }
        db.conn.execute(
            "INSERT INTO queue(name, config, group_size, priority, active, reqs) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                queue.name,
                queue.config,
                queue.group_size,
                queue.priority,
                queue.active,
                serde_json::to_string(&queue.reqs)?
            ],
        )?;
        info!(queue = %queue.name, "queue created");
        self.queue_get(db, &queue.name)
    }

    pub fn queue_get(&self, db: &Db, ident: &str) -> Result<Queue> {
        lookup_queue(&db.conn, ident)?.ok_or_else(|| SchedulerError::queue_not_found(ident))
    }

    pub fn queue_list(&self, db: &Db) -> Result<Vec<Queue>> {
        let mut stmt = db.conn.prepare(&format!("SELECT {} FROM queue ORDER BY priority DESC, id", Queue::COLUMNS))?;
        let queues = stmt.query_map([], Queue::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(queues)
    }

    /// Insert targets in one transaction. Blank lines and excluded targets are dropped.
    /// Returns how many rows were inserted.
    pub fn queue_enqueue(&self, db: &mut Db, ident: &str, targets: &[String]) -> Result<usize> {
        let tx = db.immediate()?;
        let queue = lookup_queue(&tx, ident)?.ok_or_else(|| SchedulerError::queue_not_found(ident))?;
        let mut inserted = 0;
        let mut excluded = 0;
        {
            let mut insert = tx.prepare("INSERT INTO target(queue_id, target, hashval) VALUES (?, ?, ?)")?;
            for target in targets.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                if self.exclusions().is_excluded(target) {
                    excluded += 1;
                    continue;
                }
                insert.execute(params![queue.id, target, hashval(target)])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        info!(queue = %queue.name, count = inserted, excluded, "targets enqueued");
        Ok(inserted)
    }

    /// Drop every pending target of the queue.
    pub fn queue_flush(&self, db: &mut Db, ident: &str) -> Result<usize> {
        let queue = self.queue_get(db, ident)?;
        let count = db.conn.execute("DELETE FROM target WHERE queue_id = ?", [queue.id])?;
        info!(queue = %queue.name, count, "queue flushed");
        Ok(count)
    }

    /// Delete every job of the queue together with its output archive.
    pub fn queue_prune(&self, db: &mut Db, ident: &str) -> Result<usize> {
        let tx = db.immediate()?;
        let queue = lookup_queue(&tx, ident)?.ok_or_else(|| SchedulerError::queue_not_found(ident))?;
        let outputs: Vec<String> = {
            let mut stmt = tx.prepare("SELECT output FROM job WHERE queue_id = ? AND output IS NOT NULL")?;
            let rows = stmt.query_map([queue.id], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let count = tx.execute("DELETE FROM job WHERE queue_id = ?", [queue.id])?;
        tx.commit()?;
        for output in &outputs {
            remove_output(std::path::Path::new(output))?;
        }
        info!(queue = %queue.name, count, "queue pruned");
        Ok(count)
    }
}
