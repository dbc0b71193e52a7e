//! Fetch, execute, package and upload loop.

use crate::archive;
use crate::client::{SchedulerClient, UploadOutcome};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::modules::{AgentModule, ModuleRegistry};
use crate::signals::Controls;
use scanfleet_core::{AssignResponse, Assignment, OutputUpload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

enum Fetched {
    Work(Assignment),
    NoWork,
    Failed,
    Stopped,
}

pub struct Agent {
    config: AgentConfig,
    client: SchedulerClient,
    registry: Arc<ModuleRegistry>,
    controls: Controls,
}

impl Agent {
    pub fn new(config: AgentConfig, registry: ModuleRegistry) -> Result<Self> {
        let client = SchedulerClient::new(&config.server, config.net_timeout)?;
        Ok(Self { config, client, registry: Arc::new(registry), controls: Controls::new() })
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Serve assignments from the scheduler until shut down, or once with `oneshot`.
    ///
    /// Returns the process exit code: the last job's return code, `1` when a oneshot fetch fails.
    pub async fn run(&self) -> i32 {
        info!(server = %self.config.server, queue = ?self.config.queue, caps = ?self.config.caps, "agent started");
        let mut retval = 0;
        while !self.controls.shutdown.is_cancelled() {
            let assignment = match self.fetch_assignment().await {
                Fetched::Work(a) => a,
                Fetched::NoWork => break,
                Fetched::Failed => return 1,
                Fetched::Stopped => break,
            };
            let id = assignment.id.clone();
            retval = match self.process(assignment).await {
                Ok(rv) => rv,
                Err(e) => {
                    // without an archive there is nothing to upload; the job stays open for reconcile
                    error!(job_id = %id, error = %e, "cannot package job output");
                    1
                }
            };
            debug!(job_id = %id, retval, "processed");
            if let Err(e) = self.deliver(&id, retval).await {
                error!(job_id = %id, error = %e, "cannot upload job output");
            }
            if self.config.oneshot {
                break;
            }
        }
        info!("agent stopped");
        retval
    }

    /// Execute an assignment given on the command line; nothing is uploaded.
    pub async fn run_assignment(&self, text: &str) -> Result<i32> {
        let assignment = Assignment::from_manual(text)?;
        debug!(job_id = %assignment.id, "manual assignment");
        self.process(assignment).await
    }

    async fn fetch_assignment(&self) -> Fetched {
        loop {
            if self.controls.shutdown.is_cancelled() {
                return Fetched::Stopped;
            }
            match self.client.fetch(self.config.queue.as_deref(), &self.config.caps).await {
                Ok(AssignResponse::Work(a)) => {
                    info!(job_id = %a.id, module = %a.config.module, targets = a.targets.len(), "got assignment");
                    return Fetched::Work(a);
                }
                Ok(AssignResponse::NoWork) => {
                    debug!("no work");
                    if self.config.oneshot {
                        return Fetched::NoWork;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "fetching assignment failed");
                    if self.config.oneshot {
                        return Fetched::Failed;
                    }
                }
            }
            if !self.backoff(&self.controls.shutdown).await {
                return Fetched::Stopped;
            }
        }
    }

    /// Sleep the backoff interval; `false` when `stop` fired first.
    async fn backoff(&self, stop: &CancellationToken) -> bool {
        tokio::select! {
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(self.config.backoff) => true,
        }
    }

    async fn process(&self, assignment: Assignment) -> Result<i32> {
        process_assignment(&self.registry, &self.config.workdir, assignment, &self.controls.terminate).await
    }

    async fn deliver(&self, id: &str, retval: i32) -> Result<()> {
        let zip_path = archive::archive_path(&self.config.workdir, id);
        let upload = OutputUpload::from_archive(id, retval, &tokio::fs::read(&zip_path).await?);
        loop {
            match self.client.upload(&upload).await {
                Ok(UploadOutcome::Accepted) => {
                    tokio::fs::remove_file(&zip_path).await?;
                    info!(job_id = %id, retval, "output uploaded");
                    return Ok(());
                }
                Ok(UploadOutcome::Rejected(status)) => {
                    warn!(job_id = %id, status, archive = %zip_path.display(), "output rejected by server");
                    return Ok(());
                }
                Err(e) => warn!(job_id = %id, error = %e, "output upload failed"),
            }
            if self.controls.terminate.is_cancelled() {
                warn!(job_id = %id, archive = %zip_path.display(), "terminated, leaving output on disk");
                return Ok(());
            }
            // a terminate during the pause still gets one last attempt
            self.backoff(&self.controls.terminate).await;
        }
    }
}

/// Run `assignment` in its own job directory under `root` and pack the directory.
///
/// Module failures of any kind become return code `1`; the archive exists afterwards either way.
pub async fn process_assignment(
    registry: &ModuleRegistry,
    root: &Path,
    assignment: Assignment,
    terminate: &CancellationToken,
) -> Result<i32> {
    let jobdir = archive::prepare_jobdir(root, &assignment)?;
    let retval = match registry.create(&assignment.config.module) {
        Some(module) => run_module(module, assignment, jobdir.clone(), terminate).await,
        None => {
            error!(job_id = %assignment.id, module = %assignment.config.module, "unknown module");
            1
        }
    };
    tokio::task::spawn_blocking(move || archive::pack_jobdir(&jobdir))
        .await
        .map_err(|e| AgentError::Io(std::io::Error::other(e)))??;
    Ok(retval)
}

async fn run_module(
    module: Arc<dyn AgentModule>,
    assignment: Assignment,
    jobdir: PathBuf,
    terminate: &CancellationToken,
) -> i32 {
    let id = assignment.id.clone();
    let runner = module.clone();
    let mut handle = tokio::spawn(async move { runner.run(&assignment, &jobdir).await });
    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = terminate.cancelled() => {
            info!(job_id = %id, "terminating module");
            module.terminate();
            handle.await
        }
    };
    match joined {
        Ok(Ok(retval)) => retval,
        Ok(Err(e)) => {
            error!(job_id = %id, error = ?e, "module failed");
            1
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "module crashed");
            1
        }
    }
}
