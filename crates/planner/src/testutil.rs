use crate::config::PlannerConfig;
use crate::context::Context;
use scanfleet_core::{OutputUpload, ParsedResults};
use scanfleet_scheduler::{AssignRequest, HeatmapPolicy, Scheduler, SchedulerConfig};
use scanfleet_store::{Db, NewQueue};
use std::io::{Cursor, Write};
use std::sync::Arc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// Zip archive holding `output.json` with the given content.
pub fn zip_output(output_json: &[u8]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(ParsedResults::FILENAME, SimpleFileOptions::default()).unwrap();
    zip.write_all(output_json).unwrap();
    zip.finish().unwrap().into_inner()
}

pub struct TestEnv {
    pub dir: TempDir,
    pub scheduler: Arc<Scheduler>,
    pub config: PlannerConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(SchedulerConfig {
            db: dir.path().join("fleet.db"),
            output_dir: dir.path().join("output"),
            heatmap: HeatmapPolicy { hot_level: 0, ..Default::default() },
            exclusions: Vec::new(),
        })
        .unwrap();
        let config = PlannerConfig { archive_dir: dir.path().join("archive"), ..Default::default() };
        Self { dir, scheduler: Arc::new(scheduler), config }
    }

    pub fn context(&self) -> Context {
        Context::new(self.scheduler.clone(), &self.config).unwrap()
    }

    pub fn db(&self) -> Db {
        self.scheduler.connect().unwrap()
    }

    pub fn create_queue(&self, name: &str, module: &str) {
        let queue = NewQueue {
            name: name.into(),
            config: format!(r#"{{"module":"{module}"}}"#),
            group_size: 1000,
            priority: 0,
            active: true,
            reqs: Vec::new(),
        };
        self.scheduler.queue_create(&mut self.db(), &queue).unwrap();
    }

    /// Run one job of `queue` over `targets` to completion with the given raw `output.json`.
    pub fn complete_job_raw(&self, queue: &str, targets: &[&str], output_json: &[u8]) -> String {
        let mut db = self.db();
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        self.scheduler.queue_enqueue(&mut db, queue, &targets).unwrap();
        let req = AssignRequest { queue: Some(queue.into()), ..Default::default() };
        let assignment = self.scheduler.assign(&mut db, &req).unwrap().unwrap();
        let upload = OutputUpload::from_archive(&assignment.id, 0, &zip_output(output_json));
        self.scheduler.receive_output(&mut db, &upload).unwrap();
        assignment.id
    }

    pub fn complete_job(&self, queue: &str, targets: &[&str], results: &ParsedResults) -> String {
        self.complete_job_raw(queue, targets, serde_json::to_string(results).unwrap().as_bytes())
    }
}
