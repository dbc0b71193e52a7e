use scanfleet_scheduler::SchedulerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlannerError>;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("cannot parse job output: {0}")]
    Parse(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid planner config: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
