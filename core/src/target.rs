//! Scan target strings and their heatmap bucketing.

use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;

pub const SIXENUM_SCHEME: &str = "sixenum://";

/// One scan endpoint: an address, `proto://host:port`, or a range-encoded form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target(pub String);

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target(s.to_string())
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Target {
    /// Host part of the target, canonicalized when it is an IP literal.
    pub fn host(&self) -> String {
        let raw = self.0.trim();
        if raw.starts_with(SIXENUM_SCHEME) {
            return raw.to_string();
        }
        let host = match raw.split_once("://") {
            Some((_, rest)) => authority_host(rest.split('/').next().unwrap_or(rest)),
            None => strip_brackets(raw),
        };
        match host.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => host.to_string(),
        }
    }

    /// Stable bucket key used by the heatmap.
    pub fn hashval(&self) -> String {
        hex::encode(Sha256::digest(self.host().as_bytes()))
    }
}

fn strip_brackets(s: &str) -> &str {
    s.strip_prefix('[').and_then(|r| r.split(']').next()).unwrap_or(s)
}

fn authority_host(authority: &str) -> &str {
    if authority.starts_with('[') {
        return strip_brackets(authority);
    }
    match authority.rsplit_once(':') {
        // a second colon means a bare IPv6 literal, not host:port
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

pub fn hashval(target: &str) -> String {
    Target::from(target).hashval()
}

/// Format an address for use in `host:port` strings.
pub fn format_host_address(address: &str) -> String {
    if address.contains(':') { format!("[{address}]") } else { address.to_string() }
}

/// `proto://addr:port` service endpoint, IPv6 bracketed.
pub fn service_target(proto: &str, address: &str, port: u16) -> String {
    format!("{}://{}:{}", proto, format_host_address(address), port)
}
