//! Scan modules the agent dispatches assignments to, resolved by name.

mod dummy;
mod portscan;
mod sweep;

pub use dummy::Dummy;
pub use portscan::PortScan;
pub use sweep::{HostDisco, SixEnum};

use async_trait::async_trait;
use scanfleet_core::{Assignment, AssignmentConfig, ParsedResults};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait AgentModule: Send + Sync {
    /// Process the assignment inside `workdir` and return the job's return code.
    async fn run(&self, assignment: &Assignment, workdir: &Path) -> anyhow::Result<i32>;

    /// Ask a running [`AgentModule::run`] to stop as soon as possible, keeping partial output.
    fn terminate(&self);
}

pub type ModuleFactory = fn() -> Arc<dyn AgentModule>;

/// Factory for modules that start from their `Default` state.
pub fn instance<M: AgentModule + Default + 'static>() -> Arc<dyn AgentModule> {
    Arc::new(M::default())
}

pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ModuleFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Fresh module instance for one assignment.
    pub fn create(&self, name: &str) -> Option<Arc<dyn AgentModule>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("dummy", instance::<Dummy>);
        registry.register("portscan", instance::<PortScan>);
        registry.register("hostdisco", instance::<HostDisco>);
        registry.register("sixenum", instance::<SixEnum>);
        registry
    }
}

/// `ports` key of a module config (`"22,80,8000-8100"`), or `default` when absent.
pub(crate) fn config_ports(config: &AssignmentConfig, default: Vec<u16>) -> anyhow::Result<Vec<u16>> {
    match config.get_str("ports") {
        Some(spec) => port_scan::parse_ports(spec),
        None => Ok(default),
    }
}

pub(crate) fn config_millis(config: &AssignmentConfig, key: &str, default: u64) -> Duration {
    Duration::from_millis(config.get_u64(key).unwrap_or(default))
}

pub(crate) fn write_results(workdir: &Path, results: &ParsedResults) -> io::Result<()> {
    let file = File::create(workdir.join(ParsedResults::FILENAME))?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}

/// Append-only raw log kept next to `output.json`.
pub(crate) struct ModuleLog(File);

impl ModuleLog {
    pub(crate) fn create(workdir: &Path, module: &str) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(workdir.join(format!("{module}.log")))?;
        Ok(Self(file))
    }

    pub(crate) fn line(&mut self, text: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.0, "{}", text.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_builtin_modules() {
        let registry = ModuleRegistry::default();
        assert_eq!(registry.names(), vec!["dummy", "hostdisco", "portscan", "sixenum"]);
        assert!(registry.create("nmap").is_none());
    }
}
