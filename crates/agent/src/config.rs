use scanfleet_core::interval::serde_interval;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// `agent:` section of the config file; command line flags are merged on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base url of the scheduler API.
    pub server: String,
    /// Pin every assignment request to this queue (id or name).
    pub queue: Option<String>,
    /// Capability tags announced with every assignment request.
    pub caps: Vec<String>,
    /// Pause between polls when there is no work and between failed requests.
    #[serde(with = "serde_interval")]
    pub backoff: Duration,
    #[serde(with = "serde_interval")]
    pub net_timeout: Duration,
    pub oneshot: bool,
    /// Job directories and archives are created here.
    pub workdir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:18000".into(),
            queue: None,
            caps: Vec::new(),
            backoff: Duration::from_secs(5),
            net_timeout: Duration::from_secs(300),
            oneshot: false,
            workdir: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: AgentConfig = serde_yaml::from_str("server: http://sched:8000\nbackoff: 2s\ncaps: [a, b]\n").unwrap();
        assert_eq!(cfg.server, "http://sched:8000");
        assert_eq!(cfg.backoff, Duration::from_secs(2));
        assert_eq!(cfg.caps, vec!["a", "b"]);
        assert_eq!(cfg.net_timeout, Duration::from_secs(300));
        assert!(!cfg.oneshot);
    }
}
