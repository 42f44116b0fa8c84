//! Asynchronous name resolution.
//!
//! The contract is deliberately small: resolution never blocks the event
//! loop and reports either an IPv4 address or a failure. The runtime's
//! resolver already satisfies that, so no forked helper process is needed.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;

#[derive(Error, Debug)]
pub enum ResolveError {
  #[error("name resolution timed out")]
  TimedOut,
  #[error("host has no IPv4 address")]
  NoIpv4Address,
  #[error("resolver error: {0}")]
  Io(#[from] std::io::Error),
}

pub async fn resolve_host(
  host: &str,
  port: u16,
  timeout: Duration,
) -> Result<SocketAddrV4, ResolveError> {
  let addrs = tokio::time::timeout(timeout, lookup_host((host, port)))
    .await
    .map_err(|_| ResolveError::TimedOut)??;

  addrs
    .filter_map(|addr| match addr {
      SocketAddr::V4(v4) => Some(v4),
      SocketAddr::V6(_) => None,
    })
    .next()
    .ok_or(ResolveError::NoIpv4Address)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::net::Ipv4Addr;

  #[tokio::test]
  async fn resolves_ipv4_literal_without_dns() {
    let addr = resolve_host("192.0.2.10", 5190, Duration::from_secs(5))
      .await
      .unwrap();
    assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 5190));
  }

  #[tokio::test]
  async fn ipv6_only_literal_is_rejected() {
    let result = resolve_host("::1", 5190, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(ResolveError::NoIpv4Address)));
  }
}
