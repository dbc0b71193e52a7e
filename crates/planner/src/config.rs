use crate::pipeline::StageConfig;
use scanfleet_core::interval::serde_interval;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Where processed job archives are kept once their job row is gone.
    pub archive_dir: PathBuf,
    #[serde(with = "serde_interval")]
    pub loop_sleep: Duration,
    /// Lease length of a stage lock; a crashed holder blocks the stage at most this long.
    #[serde(with = "serde_interval")]
    pub lock_ttl: Duration,
    /// Hosts with more services than this in one job are treated as tarpits.
    pub tarpit_threshold: usize,
    pub stages: Vec<StageConfig>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("archive"),
            loop_sleep: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(3600),
            tarpit_threshold: 200,
            stages: Vec::new(),
        }
    }
}
