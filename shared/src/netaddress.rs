//! Numeric IPv4/IPv6 socket addresses parsed from user input.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
}

/// A socket address that can be written with or without a port.
///
/// Accepted forms are `1.2.3.4`, `1.2.3.4:80`, `::1`, `[::1]` and
/// `[::1]:80`. When the port is missing the default given to
/// [`NetAddress::parse`] is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetAddress(SocketAddr);

impl NetAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn parse(input: &str, default_port: u16) -> Result<Self, AddressError> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| AddressError::InvalidAddress(input.to_string()))?;
            let ip = host
                .parse::<IpAddr>()
                .map_err(|_| AddressError::InvalidAddress(input.to_string()))?;
            let port = match after {
                "" => default_port,
                _ => parse_port(after.strip_prefix(':'), input)?,
            };
            return Ok(Self::new(ip, port));
        }

        // A bare IPv6 address contains several colons and never has a port
        if let Ok(ip) = input.parse::<IpAddr>() {
            return Ok(Self::new(ip, default_port));
        }

        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| AddressError::InvalidAddress(input.to_string()))?;
        let ip = host
            .parse::<IpAddr>()
            .map_err(|_| AddressError::InvalidAddress(input.to_string()))?;

        Ok(Self::new(ip, parse_port(Some(port), input)?))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

fn parse_port(port: Option<&str>, input: &str) -> Result<u16, AddressError> {
    port.filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| AddressError::InvalidPort(input.to_string()))
}

impl From<SocketAddr> for NetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<NetAddress> for SocketAddr {
    fn from(addr: NetAddress) -> Self {
        addr.0
    }
}

impl FromStr for NetAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, crate::DEFAULT_PORT)
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
