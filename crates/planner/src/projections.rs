//! Pure helpers turning parsed results and address lists into target lists.

use ipnet::IpNet;
use scanfleet_core::net::{in_networks, is_eui64, sixenum_target};
use scanfleet_core::target::service_target;
use scanfleet_core::ParsedResults;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;

fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Addresses of every host in the results, services included.
pub fn project_hosts(results: &ParsedResults) -> Vec<String> {
    dedup(
        results
            .hosts
            .iter()
            .map(|h| h.address.clone())
            .chain(results.services.iter().map(|s| s.address.clone())),
    )
}

/// `proto://addr:port` of every service in the results.
pub fn project_services(results: &ParsedResults) -> Vec<String> {
    dedup(results.services.iter().map(|s| service_target(&s.proto, &s.address, s.port)))
}

/// One `sixenum://` target per distinct /112 of the IPv6 addresses; EUI-64 hosts are skipped.
pub fn project_sixenum_targets<S: AsRef<str>>(addresses: &[S]) -> Vec<String> {
    let targets: BTreeSet<String> = addresses
        .iter()
        .filter_map(|a| match a.as_ref().parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) if !is_eui64(&v6) => Some(sixenum_target(&v6)),
            _ => None,
        })
        .collect();
    targets.into_iter().collect()
}

/// Keep only addresses inside `nets`.
pub fn filter_external_hosts(addresses: &[String], nets: &[IpNet]) -> Vec<String> {
    addresses.iter().filter(|a| in_networks(a, nets)).cloned().collect()
}

/// Drop hosts with more than `threshold` open ports, together with everything attached to them.
pub fn filter_tarpits(results: &ParsedResults, threshold: usize) -> ParsedResults {
    let mut per_host: HashMap<&str, usize> = HashMap::new();
    for service in results.services.iter().filter(|s| s.state_class() == "open") {
        *per_host.entry(service.address.as_str()).or_default() += 1;
    }
    let tarpits: HashSet<&str> = per_host.into_iter().filter(|(_, n)| *n > threshold).map(|(a, _)| a).collect();
    if tarpits.is_empty() {
        return results.clone();
    }
    ParsedResults {
        hosts: results.hosts.iter().filter(|h| !tarpits.contains(h.address.as_str())).cloned().collect(),
        services: results.services.iter().filter(|s| !tarpits.contains(s.address.as_str())).cloned().collect(),
        notes: results.notes.iter().filter(|n| !tarpits.contains(n.endpoint.address.as_str())).cloned().collect(),
        vulns: results.vulns.iter().filter(|v| !tarpits.contains(v.endpoint.address.as_str())).cloned().collect(),
    }
}
