//! Job output parsers, looked up by the module name of the job's assignment.

use crate::error::{PlannerError, Result};
use scanfleet_core::ParsedResults;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub trait Parser: Send + Sync {
    /// Parse the zip archive of a finished job.
    fn parse_job(&self, archive: &Path) -> Result<ParsedResults>;
}

/// Reads the normalized result file every built-in module writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedOutputParser;

impl Parser for NormalizedOutputParser {
    fn parse_job(&self, archive: &Path) -> Result<ParsedResults> {
        let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(|e| parse_error(archive, e))?;
        let mut entry = zip.by_name(ParsedResults::FILENAME).map_err(|e| parse_error(archive, e))?;
        let mut raw = String::new();
        entry.read_to_string(&mut raw)?;
        serde_json::from_str(&raw).map_err(|e| parse_error(archive, e))
    }
}

fn parse_error(archive: &Path, err: impl std::fmt::Display) -> PlannerError {
    PlannerError::Parse(format!("{}: {err}", archive.display()))
}

pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self { parsers: HashMap::new() }
    }

    pub fn register(&mut self, module: impl Into<String>, parser: Box<dyn Parser>) {
        self.parsers.insert(module.into(), parser);
    }

    pub fn get(&self, module: &str) -> Option<&dyn Parser> {
        self.parsers.get(module).map(|p| p.as_ref())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for module in ["dummy", "portscan", "hostdisco", "sixenum"] {
            registry.register(module, Box::new(NormalizedOutputParser));
        }
        registry
    }
}
