use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;

/// Time allowed for the server to answer before the check fails.
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks that the invoker at the configured address is up and not draining.
///
/// Requests `/ready`, which starts failing once shutdown begins.
pub async fn healthcheck(config: Config) -> Result<()> {
    let addr = local_addr(config.http_addr);
    let url = format!("http://{addr}/ready");
    tracing::debug!(%addr, "checking invoker readiness");

    let client = reqwest::Client::builder()
        .timeout(HEALTHCHECK_TIMEOUT)
        .build()?;
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("invoker at {addr} is unreachable"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("invoker at {addr} is not ready: {status}");
    }

    tracing::info!(%addr, "invoker is ready");
    Ok(())
}

/// Maps a wildcard listen address to the loopback address of the same family.
fn local_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => (Ipv4Addr::LOCALHOST, addr.port()).into(),
        IpAddr::V6(ip) if ip.is_unspecified() => (Ipv6Addr::LOCALHOST, addr.port()).into(),
        _ => addr,
    }
}
