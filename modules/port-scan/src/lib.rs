//! TCP connect scan with timeouts, retries, pacing and cooperative cancellation.

use anyhow::{anyhow, Result};
use rand::{thread_rng, Rng};
use scanfleet_core::ratelimiter::RateLimiter;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u16 = start.trim().parse()?;
            let e: u16 = end.trim().parse()?;
            if s == 0 || s > e {
                return Err(anyhow!("invalid port range: {}", part));
            }
            ports.extend(s..=e);
        } else {
            let p: u16 = part.parse()?;
            if p == 0 {
                return Err(anyhow!("invalid port: {}", part));
            }
            ports.push(p);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Ports scanned when the assignment names none.
pub fn default_top_ports() -> Vec<u16> {
    top_ports(64)
}

/// First `n` entries of a curated list of commonly exposed ports.
pub fn top_ports(n: usize) -> Vec<u16> {
    const CURATED: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 123, 135, 139, 143, 389, 443, 445, 465, 500, 587, 636, 993,
        995, 1080, 1194, 1352, 1433, 1521, 1723, 2049, 2375, 2376, 3000, 3128, 3268, 3306, 3389,
        4444, 4500, 5000, 5060, 5432, 5601, 5671, 5672, 5900, 5985, 5986, 6379, 7001, 7002, 8000,
        8080, 8081, 8200, 8443, 8500, 8530, 8888, 9000, 9092, 9200, 9300, 9418, 9999, 10000,
        11211, 15672, 27017,
    ];
    CURATED[..n.min(CURATED.len())].to_vec()
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub timeout: Duration,
    /// Connection attempts in flight per host.
    pub concurrency: usize,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_millis(1000), concurrency: 64, retries: 0, retry_delay: Duration::from_millis(100) }
    }
}

/// Connect-scan `ports` on `host` and return the open ones, sorted.
///
/// Cancelling `cancel` stops pending probes; ports confirmed open until then are still returned.
pub async fn scan_host(
    host: &str,
    ports: &[u16],
    opts: &ScanOptions,
    pacing: Option<Arc<RateLimiter>>,
    cancel: &CancellationToken,
) -> Vec<u16> {
    let host = resolve_best_effort(host);
    let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<u16>(ports.len().max(1));

    for &port in ports {
        let tx = tx.clone();
        let host = host.clone();
        let sem = sem.clone();
        let pacing = pacing.clone();
        let cancel = cancel.clone();
        let opts = opts.clone();
        tokio::spawn(async move {
            let probe = async move {
                let Ok(_permit) = sem.acquire_owned().await else { return false };
                if let Some(rl) = pacing {
                    rl.acquire().await;
                }
                probe_port(&host, port, &opts).await
            };
            let open = tokio::select! {
                _ = cancel.cancelled() => false,
                open = probe => open,
            };
            if open {
                let _ = tx.send(port).await;
            }
        });
    }
    drop(tx);

    let mut open = Vec::new();
    while let Some(p) = rx.recv().await {
        open.push(p);
    }
    open.sort_unstable();
    open
}

async fn probe_port(host: &str, port: u16, opts: &ScanOptions) -> bool {
    let mut attempts = 0;
    loop {
        if let Ok(Ok(_stream)) = timeout(opts.timeout, TcpStream::connect((host, port))).await {
            return true;
        }
        attempts += 1;
        if attempts > opts.retries {
            return false;
        }
        let base = opts.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempts.min(6));
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}

/// Resolve a host name once. Returns an IP string on success, or the input unchanged.
pub fn resolve_best_effort(host: &str) -> String {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }
    match (host, 0u16).to_socket_addrs().ok().and_then(|mut it| it.next()) {
        Some(sock) => sock.ip().to_string(),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parse_simple_list() {
        let v = parse_ports("22,80,443").unwrap();
        assert_eq!(v, vec![22, 80, 443]);
    }

    #[test]
    fn parse_ranges_and_list() {
        let v = parse_ports("1-3,5,3").unwrap();
        assert_eq!(v, vec![1, 2, 3, 5]);
    }

    #[test]
    fn reject_invalid() {
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("10-5").is_err());
        assert!(parse_ports("http").is_err());
    }

    #[tokio::test]
    async fn finds_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let opts = ScanOptions { timeout: Duration::from_millis(500), ..Default::default() };
        let open = scan_host("127.0.0.1", &[open_port, closed], &opts, None, &CancellationToken::new()).await;
        assert_eq!(open, vec![open_port]);
    }

    #[tokio::test]
    async fn cancelled_scan_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = ScanOptions { timeout: Duration::from_secs(30), ..Default::default() };
        // TEST-NET-1, nothing answers there
        let open = scan_host("192.0.2.1", &[80, 443], &opts, None, &cancel).await;
        assert!(open.is_empty());
    }
}
