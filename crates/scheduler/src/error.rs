use scanfleet_core::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn job_not_found(id: &str) -> Self {
        SchedulerError::NotFound(format!("job {id}"))
    }

    pub fn queue_not_found(ident: &str) -> Self {
        SchedulerError::NotFound(format!("queue {ident}"))
    }
}
