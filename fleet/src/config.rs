use anyhow::{Context, Result};
use scanfleet_agent::AgentConfig;
use scanfleet_planner::PlannerConfig;
use scanfleet_scheduler::SchedulerConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG: &str = "scanfleet.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: "127.0.0.1:18000".into() }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// Database, output directory, heatmap and exclusions shared by server, planner and admin commands.
    pub scheduler: SchedulerConfig,
    pub agent: AgentConfig,
    pub planner: PlannerConfig,
}

/// Load the given file, or `./scanfleet.yaml` when present, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
