use crate::config::PlannerConfig;
use crate::error::Result;
use crate::parser::ParserRegistry;
use scanfleet_scheduler::Scheduler;
use scanfleet_store::Db;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything a stage may touch while it runs.
pub struct Context {
    pub scheduler: Arc<Scheduler>,
    pub db: Db,
    pub parsers: ParserRegistry,
    pub archive_dir: PathBuf,
    pub lock_ttl: Duration,
    /// Identity of this planner instance in `stage_lock`.
    pub holder: String,
}

impl Context {
    pub fn new(scheduler: Arc<Scheduler>, config: &PlannerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.archive_dir)?;
        let db = scheduler.connect()?;
        Ok(Self {
            scheduler,
            db,
            parsers: ParserRegistry::default(),
            archive_dir: config.archive_dir.clone(),
            lock_ttl: config.lock_ttl,
            holder: uuid::Uuid::new_v4().to_string(),
        })
    }
}
