//! Runtime settings for the server.

use shared::{NetAddress, DEFAULT_PORT};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Immutable server settings, built once from the command line.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub address: NetAddress,
    /// How long a person without an attached stream may stay idle
    pub person_timeout: Duration,
    /// How long a shout lasts before it ends by itself
    pub shout_duration: Duration,
    /// Connections handled at once; further accepts wait for a free slot
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: NetAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            person_timeout: Duration::from_secs(5 * 60),
            shout_duration: Duration::from_secs(10),
            max_connections: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address.to_string(), "0.0.0.0:5144");
        assert_eq!(config.person_timeout, Duration::from_secs(300));
        assert_eq!(config.shout_duration, Duration::from_secs(10));
        assert_eq!(config.max_connections, 1024);
    }
}
