use log::{error, info};
use std::collections::BTreeSet;
use std::net::{IpAddr, ToSocketAddrs};
use url::{Host, Url};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum HostError {
    #[error("unable to parse url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("url '{0}' has no host")]
    NoHost(String),

    #[error("address '{0}' is a wildcard")]
    Wildcard(IpAddr),

    #[error("host '{host}' was not resolved: {reason}")]
    Unresolved { host: String, reason: String },

    #[error("host '{0}' resolved to no usable address")]
    NoAddress(String),
}

/// Host part of an output url, without IPv6 brackets.
pub fn extract_host(url: &str) -> Result<String, HostError> {
    let parsed = Url::parse(url).map_err(|e| HostError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let host = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => String::new(),
    };
    if host.is_empty() {
        return Err(HostError::NoHost(url.to_string()));
    }
    Ok(host)
}

/// Checks that `host` names at least one concrete address.
///
/// IP literals are taken as-is unless they are the wildcard address; names
/// are resolved and wildcard results discarded.
pub fn validate_host(host: &str) -> Result<Vec<IpAddr>, HostError> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        if addr.is_unspecified() {
            error!("Net: '{}' is a wildcard address", addr);
            return Err(HostError::Wildcard(addr));
        }
        info!("Net: IP address '{}' is valid", addr);
        return Ok(vec![addr]);
    }

    let resolved = (host, 0u16).to_socket_addrs().map_err(|e| {
        error!("Net: host name '{}' was not resolved: {}", host, e);
        HostError::Unresolved {
            host: host.to_string(),
            reason: e.to_string(),
        }
    })?;

    let addresses: BTreeSet<IpAddr> = resolved
        .map(|socket| socket.ip())
        .filter(|ip| !ip.is_unspecified())
        .collect();

    match addresses.iter().next() {
        None => {
            error!("Net: host name '{}' resolved to no usable address", host);
            return Err(HostError::NoAddress(host.to_string()));
        }
        Some(addr) if addresses.len() == 1 => {
            info!("Net: host name '{}' resolved to '{}'", host, addr)
        }
        Some(_) => info!("Net: host name '{}' resolved to {} addresses", host, addresses.len()),
    }
    Ok(addresses.into_iter().collect())
}

/// Extracts and validates the host of an output url.
pub fn validate_output_host(url: &str) -> Result<Vec<IpAddr>, HostError> {
    let host = extract_host(url)?;
    validate_host(&host)
}
