//! Host discovery via TCP connect sweep with timeouts, pacing and cooperative cancellation.

use anyhow::{anyhow, Result};
use ipnet::IpNet;
use scanfleet_core::net::{parse_sixenum, MAX_ENUMERATE};
use scanfleet_core::ratelimiter::RateLimiter;
use scanfleet_core::target::SIXENUM_SCHEME;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Expand a CIDR into its usable host addresses.
pub fn expand_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    let net: IpNet = cidr.parse()?;
    let size = 1u128 << u32::from(net.max_prefix_len() - net.prefix_len()).min(127);
    if size > MAX_ENUMERATE {
        return Err(anyhow!("network too large to sweep: {cidr}"));
    }
    Ok(net.hosts().collect())
}

/// Addresses covered by one target: a `sixenum://` range, a CIDR, an address or a host name.
pub fn expand_target(target: &str) -> Result<Vec<IpAddr>> {
    let target = target.trim();
    if target.starts_with(SIXENUM_SCHEME) {
        return Ok(parse_sixenum(target)?.map(IpAddr::V6).collect());
    }
    if target.contains('/') {
        return expand_cidr(target);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let resolved = (target, 0u16)
        .to_socket_addrs()
        .map_err(|e| anyhow!("cannot resolve {target}: {e}"))?
        .next()
        .ok_or_else(|| anyhow!("cannot resolve {target}"))?;
    Ok(vec![resolved.ip()])
}

/// Live when any of `ports` accepts a connection within `per_attempt`.
pub async fn is_host_live(ip: IpAddr, ports: &[u16], per_attempt: Duration) -> bool {
    for &p in ports {
        if let Ok(Ok(_)) = timeout(per_attempt, TcpStream::connect(SocketAddr::new(ip, p))).await {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub ports: Vec<u16>,
    pub timeout: Duration,
    pub concurrency: usize,
    /// Hosts probed per second, `0` for unpaced.
    pub qps: u32,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self { ports: vec![22, 80, 443], timeout: Duration::from_millis(500), concurrency: 256, qps: 0 }
    }
}

/// Sweep `ips` and return the live ones in input order.
///
/// Cancelling `cancel` stops the sweep; hosts found live so far are still returned.
pub async fn discover_hosts(ips: Vec<IpAddr>, opts: &SweepOptions, cancel: &CancellationToken) -> Vec<IpAddr> {
    let (tx, mut rx) = mpsc::channel::<(usize, IpAddr)>(ips.len().max(1));
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let pacing = RateLimiter::optional(opts.qps);

    for (idx, ip) in ips.into_iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(rl) = &pacing {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = rl.acquire() => {}
            }
        }
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = sem.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let tx = tx.clone();
        let ports = opts.ports.clone();
        let per_attempt = opts.timeout;
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let live = tokio::select! {
                _ = cancel.cancelled() => false,
                live = is_host_live(ip, &ports, per_attempt) => live,
            };
            if live {
                let _ = tx.send((idx, ip)).await;
            }
            drop(permit);
        });
    }
    drop(tx);
    let mut live = Vec::new();
    while let Some(found) = rx.recv().await {
        live.push(found);
    }
    live.sort_unstable_by_key(|(idx, _)| *idx);
    live.into_iter().map(|(_, ip)| ip).collect()
}
