//! Events delivered by a client connection.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Small set of per-player status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlayerFlags(u8);

impl PlayerFlags {
    pub const NONE: PlayerFlags = PlayerFlags(0);
    pub const TYPING: PlayerFlags = PlayerFlags(1 << 0);
    pub const CONNECTED: PlayerFlags = PlayerFlags(1 << 1);
    pub const SHOUTING: PlayerFlags = PlayerFlags(1 << 2);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: PlayerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: PlayerFlags, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Builds the flags carried by a `player` frame.
    pub fn from_status(connected: bool, typing: bool) -> Self {
        let mut flags = PlayerFlags::NONE;
        flags.set(PlayerFlags::CONNECTED, connected);
        flags.set(PlayerFlags::TYPING, typing);
        flags
    }
}

impl BitOr for PlayerFlags {
    type Output = PlayerFlags;

    fn bitor(self, rhs: PlayerFlags) -> PlayerFlags {
        PlayerFlags(self.0 | rhs.0)
    }
}

impl BitAnd for PlayerFlags {
    type Output = PlayerFlags;

    fn bitand(self, rhs: PlayerFlags) -> PlayerFlags {
        PlayerFlags(self.0 & rhs.0)
    }
}

impl Not for PlayerFlags {
    type Output = PlayerFlags;

    fn not(self) -> PlayerFlags {
        PlayerFlags(!self.0)
    }
}

impl fmt::Display for PlayerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(PlayerFlags::CONNECTED) {
            names.push("connected");
        }
        if self.contains(PlayerFlags::TYPING) {
            names.push("typing");
        }
        if self.contains(PlayerFlags::SHOUTING) {
            names.push("shouting");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Typed events produced by the network side of the client.
///
/// Events own their payloads so they can be queued and moved across threads.
/// `PollChanged` only concerns the worker's own wake-ups and never reaches
/// the game state.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Header {
        self_num: usize,
    },
    PlayerNameChanged {
        player_num: usize,
        name: String,
    },
    PlayerFlagsChanged {
        player_num: usize,
        flags: PlayerFlags,
    },
    PlayerShoutingChanged {
        player_num: usize,
        shouting: bool,
    },
    TileChanged {
        num: usize,
        x: i32,
        y: i32,
        letter: char,
        last_player_moved: Option<usize>,
        new_tile: bool,
    },
    Message {
        player: usize,
        text: String,
    },
    Error {
        message: String,
    },
    RunningStateChanged {
        running: bool,
    },
    StateChanged,
    PollChanged,
}

impl ConnectionEvent {
    /// Whether the event is meant for consumers outside the worker.
    pub fn is_public(&self) -> bool {
        !matches!(self, ConnectionEvent::PollChanged)
    }
}
