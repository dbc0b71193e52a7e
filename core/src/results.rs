//! Normalized result set produced by agent modules and consumed by planner parsers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedHost {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedService {
    pub address: String,
    pub proto: String,
    pub port: u16,
    /// `open`, `closed`, `filtered`, optionally with a `:reason` suffix.
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl ParsedService {
    pub fn state_class(&self) -> &str {
        self.state.split(':').next().unwrap_or_default()
    }
}

/// Endpoint a note or vuln hangs on: a host, optionally narrowed to one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedNote {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_target: Option<String>,
    pub xtype: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedVuln {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_target: Option<String>,
    pub xtype: String,
    pub name: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub descr: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub refs: Vec<String>,
}

/// Everything one job found, keyed by natural keys rather than ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResults {
    #[serde(default)]
    pub hosts: Vec<ParsedHost>,
    #[serde(default)]
    pub services: Vec<ParsedService>,
    #[serde(default)]
    pub notes: Vec<ParsedNote>,
    #[serde(default)]
    pub vulns: Vec<ParsedVuln>,
}

impl ParsedResults {
    /// File name modules write their normalized results to.
    pub const FILENAME: &'static str = "output.json";

    pub fn add_host(&mut self, address: &str) {
        if !self.hosts.iter().any(|h| h.address == address) {
            self.hosts.push(ParsedHost { address: address.to_string(), ..Default::default() });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.services.is_empty() && self.notes.is_empty() && self.vulns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_class_strips_reason() {
        let svc = ParsedService { state: "closed:reset".into(), ..Default::default() };
        assert_eq!(svc.state_class(), "closed");
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let parsed: ParsedResults = serde_json::from_str(r#"{"hosts": [{"address": "::1"}]}"#).unwrap();
        assert_eq!(parsed.hosts.len(), 1);
        assert!(parsed.services.is_empty());
    }

    #[test]
    fn add_host_dedups() {
        let mut r = ParsedResults::default();
        r.add_host("10.0.0.1");
        r.add_host("10.0.0.1");
        assert_eq!(r.hosts.len(), 1);
    }
}
