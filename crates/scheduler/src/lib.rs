//! Scheduler service: hands target batches to agents, records job results and
//! throttles per-host load through the heatmap.

pub mod error;
pub mod heatmap;
pub mod http;
pub mod queue;
pub mod service;

pub use error::{Result, SchedulerError};
pub use heatmap::HeatmapPolicy;
pub use service::{AssignRequest, Scheduler, SchedulerConfig, RETVAL_RECONCILED};
