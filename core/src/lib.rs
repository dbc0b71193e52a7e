//! Core utilities and shared types for the scanfleet scheduler, planner and agents.

pub mod exclusions;
pub mod interval;
pub mod net;
pub mod protocol;
pub mod ratelimiter;
pub mod results;
pub mod target;

pub use protocol::{is_job_id, AssignResponse, Assignment, AssignmentConfig, OutputUpload, ProtocolError};
pub use results::ParsedResults;
pub use target::Target;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
