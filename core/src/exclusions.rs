use anyhow::{anyhow, Result};
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::target::Target;

/// One exclusion entry: either a network or a regular expression over the whole target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// Compiled exclusion rules consulted before targets enter a queue.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    nets: Vec<IpNet>,
    patterns: Vec<Regex>,
}

impl ExclusionMatcher {
    pub fn new(rules: &[ExclusionRule]) -> Result<Self> {
        let mut matcher = ExclusionMatcher::default();
        for rule in rules {
            if let Some(net) = &rule.network {
                matcher.nets.push(net.parse().map_err(|_| anyhow!("invalid exclusion network: {net}"))?);
            }
            if let Some(re) = &rule.regex {
                matcher.patterns.push(Regex::new(re)?);
            }
        }
        Ok(matcher)
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty() && self.patterns.is_empty()
    }

    pub fn is_excluded(&self, target: &str) -> bool {
        if self.patterns.iter().any(|re| re.is_match(target)) {
            return true;
        }
        match Target::from(target).host().parse::<IpAddr>() {
            Ok(ip) => self.nets.iter().any(|n| n.contains(&ip)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_networks_and_patterns() {
        let rules: Vec<ExclusionRule> = serde_yaml::from_str(
            "- network: 10.0.0.0/8\n- regex: '^tcp://.*:445$'\n",
        )
        .unwrap();
        let m = ExclusionMatcher::new(&rules).unwrap();
        assert!(m.is_excluded("10.1.2.3"));
        assert!(m.is_excluded("tcp://10.1.2.3:80"));
        assert!(m.is_excluded("tcp://192.168.0.1:445"));
        assert!(!m.is_excluded("tcp://192.168.0.1:80"));
        assert!(!m.is_excluded("example.com"));
    }

    #[test]
    fn rejects_bad_rules() {
        let rule = ExclusionRule { network: Some("nope".into()), regex: None };
        assert!(ExclusionMatcher::new(&[rule]).is_err());
    }
}
