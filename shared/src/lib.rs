//! Protocol types shared by the word-game server and client.
//!
//! Everything that both ends of the connection must agree on lives here: the
//! fixed player and tile limits, the chunk payload formats, the request routes,
//! the handshake accept token, and the event stream the client exposes to its
//! presentation layer.

pub mod bitset;
pub mod event;
pub mod handshake;
pub mod netaddress;
pub mod request;
pub mod signal;
pub mod wire;

pub use bitset::{Bitset, PlayerBitset, TileBitset};
pub use event::{ConnectionEvent, PlayerFlags};
pub use netaddress::{AddressError, NetAddress};
pub use request::{Request, RequestError};
pub use signal::{ListenerId, Signal};

/// Port the server listens on when none is given.
pub const DEFAULT_PORT: u16 = 5144;

/// Maximum number of players in one conversation.
pub const MAX_PLAYERS: usize = 6;

/// Number of player slots the client keeps state for. Events about players
/// beyond this index are ignored by the client.
pub const N_VISIBLE_PLAYERS: usize = 6;

/// Number of letter tiles in a full game.
pub const N_TILES: usize = 122;

/// Letter distribution of the tile bag. The counts add up to [`N_TILES`].
pub const LETTER_COUNTS: &[(char, usize)] = &[
    ('A', 12),
    ('B', 2),
    ('C', 1),
    ('Ĉ', 1),
    ('D', 3),
    ('E', 12),
    ('F', 1),
    ('G', 1),
    ('Ĝ', 1),
    ('H', 1),
    ('Ĥ', 1),
    ('I', 11),
    ('J', 4),
    ('Ĵ', 1),
    ('K', 4),
    ('L', 7),
    ('M', 3),
    ('N', 10),
    ('O', 13),
    ('P', 3),
    ('R', 8),
    ('S', 7),
    ('Ŝ', 1),
    ('T', 7),
    ('U', 3),
    ('Ŭ', 1),
    ('V', 2),
    ('Z', 1),
];
