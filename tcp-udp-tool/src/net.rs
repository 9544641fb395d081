//! Address helpers: port validation, local bind address parsing and
//! asynchronous name resolution.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{PortError, TransportError};

/// Check a user-entered port.  `allow_zero` permits the "any free port"
/// value used when binding.
pub fn validate_port(value: i64, allow_zero: bool) -> Result<u16, PortError> {
    if !(0..=i64::from(u16::MAX)).contains(&value) {
        return Err(PortError::OutOfRange(value));
    }
    if value == 0 && !allow_zero {
        return Err(PortError::ZeroNotAllowed);
    }
    Ok(value as u16)
}

/// Parse a local interface address for binding.
///
/// Accepts a literal IPv4/IPv6 address (brackets optional for IPv6), plus
/// the shorthands `any`/`*` (IPv4 any) and `any6` (IPv6 any).
pub fn parse_local_addr(address: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let trimmed = address.trim();
    let ip = match trimmed {
        "" | "any" | "*" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "any6" => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        other => other
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| TransportError::InvalidAddress(other.to_string()))?,
    };
    Ok(SocketAddr::new(ip, port))
}

/// Resolve `host:port`, returning every candidate address.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TransportError::InvalidAddress("empty host".into()));
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::Resolution {
            host: host.to_string(),
            reason: "no addresses found".into(),
        });
    }
    Ok(addrs)
}

/// Pick the first candidate matching the family of `local`, if one is given.
pub fn pick_family(candidates: &[SocketAddr], local: Option<SocketAddr>) -> Option<SocketAddr> {
    match local {
        Some(local) => candidates
            .iter()
            .copied()
            .find(|a| a.is_ipv4() == local.is_ipv4()),
        None => candidates.first().copied(),
    }
}

/// Unspecified address of the same family as `addr`, port 0.
pub(crate) fn ephemeral_for(addr: SocketAddr) -> SocketAddr {
    let ip = if addr.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}
