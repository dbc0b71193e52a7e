//! Address arithmetic used by the planner, the scheduler tooling and the agent modules.

use anyhow::{anyhow, bail, Result};
use ipnet::{IpNet, Ipv4AddrRange, Ipv4Subnets, Ipv6AddrRange, Ipv6Subnets};
use std::net::{IpAddr, Ipv6Addr};

use crate::target::SIXENUM_SCHEME;

/// Refuse to materialize networks larger than this many addresses.
pub const MAX_ENUMERATE: u128 = 1 << 24;

/// Every address of a network (network and broadcast included); a bare address yields itself.
pub fn enumerate_network(spec: &str) -> Result<Vec<String>> {
    let spec = spec.trim();
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(vec![ip.to_string()]);
    }
    let net: IpNet = spec.parse().map_err(|_| anyhow!("invalid network: {spec}"))?;
    let net = net.trunc();
    let size = 1u128 << (u32::from(net.max_prefix_len() - net.prefix_len())).min(127);
    if size > MAX_ENUMERATE {
        bail!("network too large to enumerate: {spec}");
    }
    Ok(match net {
        IpNet::V4(n) => Ipv4AddrRange::new(n.network(), n.broadcast()).map(|ip| ip.to_string()).collect(),
        IpNet::V6(n) => Ipv6AddrRange::new(n.network(), n.broadcast()).map(|ip| ip.to_string()).collect(),
    })
}

/// Summarize an inclusive address range into the minimal list of CIDRs.
pub fn range_to_cidrs(start: &str, end: &str) -> Result<Vec<IpNet>> {
    let (start, end): (IpAddr, IpAddr) = (start.trim().parse()?, end.trim().parse()?);
    if start > end {
        bail!("range start {start} is after end {end}");
    }
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => Ok(Ipv4Subnets::new(s, e, 0).map(IpNet::V4).collect()),
        (IpAddr::V6(s), IpAddr::V6(e)) => Ok(Ipv6Subnets::new(s, e, 0).map(IpNet::V6).collect()),
        _ => bail!("range endpoints must be the same address family"),
    }
}

pub fn parse_networks<S: AsRef<str>>(nets: &[S]) -> Result<Vec<IpNet>> {
    nets.iter()
        .map(|n| n.as_ref().trim().parse::<IpNet>().map_err(|_| anyhow!("invalid network: {}", n.as_ref())))
        .collect()
}

pub fn in_networks(address: &str, nets: &[IpNet]) -> bool {
    match address.parse::<IpAddr>() {
        Ok(ip) => nets.iter().any(|n| n.contains(&ip)),
        Err(_) => false,
    }
}

/// SLAAC EUI-64 interface ids carry `ff:fe` in the middle; those hosts cannot be enumerated.
pub fn is_eui64(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    o[11] == 0xff && o[12] == 0xfe
}

/// `sixenum://` target sweeping the last 16 bits of the address.
pub fn sixenum_target(addr: &Ipv6Addr) -> String {
    let groups: Vec<String> = addr.segments()[..7].iter().map(|g| format!("{g:04x}")).collect();
    format!("{}{}:0-ffff", SIXENUM_SCHEME, groups.join(":"))
}

/// Decode a `sixenum://` target into its address range.
pub fn parse_sixenum(target: &str) -> Result<Ipv6AddrRange> {
    let body = target
        .strip_prefix(SIXENUM_SCHEME)
        .ok_or_else(|| anyhow!("not a sixenum target: {target}"))?;
    let (prefix, range) = body.rsplit_once(':').ok_or_else(|| anyhow!("invalid sixenum target: {target}"))?;
    let (lo, hi) = range.split_once('-').ok_or_else(|| anyhow!("invalid sixenum range: {target}"))?;
    let lo = u16::from_str_radix(lo, 16)?;
    let hi = u16::from_str_radix(hi, 16)?;
    if lo > hi {
        bail!("invalid sixenum range: {target}");
    }
    let base: Ipv6Addr = format!("{prefix}:0").parse()?;
    let mut start = base.segments();
    let mut end = base.segments();
    start[7] = lo;
    end[7] = hi;
    Ok(Ipv6AddrRange::new(Ipv6Addr::from(start), Ipv6Addr::from(end)))
}
