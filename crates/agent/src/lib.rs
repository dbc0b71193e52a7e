//! Scan agent: pulls assignments from the scheduler, runs the named module in a
//! private job directory, zips the directory and uploads it.

pub mod agent;
pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod modules;
pub mod signals;

pub use agent::{process_assignment, Agent};
pub use client::{SchedulerClient, UploadOutcome};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use modules::{AgentModule, ModuleRegistry};
pub use signals::{send_signal, with_signals, Controls, SignalGuard};
