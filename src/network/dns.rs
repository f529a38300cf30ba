use anyhow::{Error, anyhow};
use std::net::IpAddr;
use tokio::net::lookup_host;

/// Resolve a hostname to its address records through the system resolver.
///
/// IPv4 addresses are preferred; IPv6 records are used only when no IPv4
/// record exists. The returned list may be empty, which the engine turns
/// into a workflow error.
pub async fn resolve_host_ips(hostname: &str) -> Result<Vec<String>, Error> {
    let addrs = lookup_host((hostname, 80))
        .await
        .map_err(|e| anyhow!("DNS resolution failed for {}: {}", hostname, e))?;

    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for addr in addrs {
        match addr.ip() {
            IpAddr::V4(ip) => {
                let ip = ip.to_string();
                if !v4.contains(&ip) {
                    v4.push(ip);
                }
            }
            IpAddr::V6(ip) => {
                let ip = ip.to_string();
                if !v6.contains(&ip) {
                    v6.push(ip);
                }
            }
        }
    }

    Ok(if v4.is_empty() { v6 } else { v4 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let ips = resolve_host_ips("localhost").await.unwrap();
        assert!(!ips.is_empty());
        assert!(ips.contains(&"127.0.0.1".to_string()) || ips.contains(&"::1".to_string()));
    }

    #[tokio::test]
    async fn unknown_hosts_error() {
        assert!(
            resolve_host_ips("definitely-not-a-real-host.invalid")
                .await
                .is_err()
        );
    }
}
