//! Runtime settings for the client.

use shared::DEFAULT_PORT;
use std::time::Duration;

/// Immutable client settings, built once from the command line.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address of the server
    pub server: String,
    pub port: u16,
    /// Room to join
    pub room: String,
    pub player_name: String,
    /// Delay before reattaching after the stream drops. `None` makes a
    /// dropped stream final.
    pub reconnect_delay: Option<Duration>,
}

impl ClientConfig {
    /// Name used when none is given: the login name, or `player`.
    pub fn default_player_name() -> String {
        std::env::var("USER")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "player".to_string())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            room: "default".to_string(),
            player_name: Self::default_player_name(),
            reconnect_delay: None,
        }
    }
}
