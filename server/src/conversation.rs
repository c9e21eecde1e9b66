//! Authoritative state of one game room.
//!
//! A conversation owns its players, the chat history, the letter tiles and
//! the shout state. Every mutation emits one of two signals so that watch
//! responses can mark what they still have to send:
//!
//! - `changed_signal` for room-wide changes (game started, new message,
//!   tile moved, shout started or ended)
//! - `player_changed_signal` with the index of a player whose name or
//!   status changed
//!
//! Listeners run synchronously while the caller holds the conversation lock,
//! after the state they describe is already updated. Requests that refer to
//! a player who has left are ignored rather than reported as errors.

use log::{debug, info};
use rand::seq::SliceRandom;
use shared::{wire, Signal, LETTER_COUNTS, MAX_PLAYERS, N_TILES};
use std::time::{Duration, Instant};

/// Distance between neighbouring tiles when they are first flipped.
pub const TILE_SIZE: i32 = 20;

/// Number of tiles per row when tiles are first flipped.
pub const TILE_COLUMNS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingStart,
    InProgress,
}

/// Room-wide change carried by [`Conversation::changed_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationChange {
    StateChanged,
    MessageAdded,
    TileChanged(usize),
    /// The shouting state of this player changed.
    ShoutingChanged(usize),
}

#[derive(Debug, Clone)]
pub struct Player {
    pub num: usize,
    pub name: String,
    pub connected: bool,
    pub typing: bool,
    name_message: String,
}

impl Player {
    fn new(num: usize, name: &str) -> Self {
        Self {
            num,
            name: name.to_string(),
            connected: true,
            typing: false,
            name_message: wire::render_player_name(num, name),
        }
    }

    /// Pre-rendered `player-name` payload.
    pub fn name_message(&self) -> &str {
        &self.name_message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub num: usize,
    pub x: i32,
    pub y: i32,
    pub letter: char,
    pub last_player: Option<usize>,
}

pub struct Conversation {
    state: ConversationState,
    players: Vec<Player>,
    /// Rendered `message` payloads in the order they were sent.
    messages: Vec<String>,
    tiles: Vec<Tile>,
    tile_bag: Vec<char>,
    shouting_player: Option<usize>,
    shout_started: Option<Instant>,
    pub changed_signal: Signal<ConversationChange>,
    pub player_changed_signal: Signal<usize>,
}

impl Conversation {
    pub fn new() -> Self {
        let mut bag: Vec<char> = LETTER_COUNTS
            .iter()
            .flat_map(|&(letter, count)| std::iter::repeat(letter).take(count))
            .collect();
        bag.shuffle(&mut rand::thread_rng());
        Self::with_tile_bag(bag)
    }

    /// Creates a conversation that deals tiles from the end of `bag`.
    pub fn with_tile_bag(bag: Vec<char>) -> Self {
        Self {
            state: ConversationState::AwaitingStart,
            players: Vec::with_capacity(MAX_PLAYERS),
            messages: Vec::new(),
            tiles: Vec::with_capacity(N_TILES),
            tile_bag: bag,
            shouting_player: None,
            shout_started: None,
            changed_signal: Signal::new(),
            player_changed_signal: Signal::new(),
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, num: usize) -> Option<&Player> {
        self.players.get(num)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tiles_remaining(&self) -> usize {
        self.tile_bag.len()
    }

    pub fn shouting_player(&self) -> Option<usize> {
        self.shouting_player
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Whether new players may still join.
    pub fn is_open(&self) -> bool {
        self.state == ConversationState::AwaitingStart && !self.is_full()
    }

    pub fn has_connected_players(&self) -> bool {
        self.players.iter().any(|p| p.connected)
    }

    /// Adds a player and returns its index, or `None` if the room is closed.
    /// The game starts as soon as the room is full.
    pub fn add_player(&mut self, name: &str) -> Option<usize> {
        if !self.is_open() {
            return None;
        }

        let num = self.players.len();
        self.players.push(Player::new(num, name));
        debug!("Player {} '{}' joined conversation", num, name);
        self.player_changed_signal.emit(&num);

        if self.is_full() {
            self.start();
        }

        Some(num)
    }

    pub fn start(&mut self) {
        if self.state == ConversationState::AwaitingStart {
            self.state = ConversationState::InProgress;
            info!("Conversation started with {} players", self.players.len());
            self.changed_signal.emit(&ConversationChange::StateChanged);
        }
    }

    fn connected_player(&self, num: usize) -> bool {
        self.players.get(num).map_or(false, |p| p.connected)
    }

    pub fn add_message(&mut self, player: usize, text: &str) {
        if !self.connected_player(player) {
            return;
        }

        self.messages.push(wire::render_message(player, text));
        self.changed_signal.emit(&ConversationChange::MessageAdded);
    }

    pub fn set_typing(&mut self, player: usize, typing: bool) {
        if !self.connected_player(player) || self.players[player].typing == typing {
            return;
        }

        self.players[player].typing = typing;
        self.player_changed_signal.emit(&player);
    }

    pub fn player_left(&mut self, player: usize) {
        if !self.connected_player(player) {
            return;
        }

        if self.shouting_player == Some(player) {
            self.end_shout();
        }

        let p = &mut self.players[player];
        p.connected = false;
        p.typing = false;
        info!("Player {} '{}' left conversation", player, p.name);
        self.player_changed_signal.emit(&player);
    }

    /// Makes `player` the shouting player unless someone already is.
    pub fn shout(&mut self, player: usize, now: Instant) -> bool {
        if !self.connected_player(player) || self.shouting_player.is_some() {
            return false;
        }

        self.shouting_player = Some(player);
        self.shout_started = Some(now);
        self.changed_signal
            .emit(&ConversationChange::ShoutingChanged(player));
        true
    }

    /// Ends the current shout if it started at least `duration` ago.
    pub fn expire_shout(&mut self, now: Instant, duration: Duration) {
        match self.shout_started {
            Some(started) if now.saturating_duration_since(started) >= duration => {
                self.end_shout()
            }
            _ => {}
        }
    }

    fn end_shout(&mut self) {
        self.shout_started = None;
        if let Some(player) = self.shouting_player.take() {
            self.changed_signal
                .emit(&ConversationChange::ShoutingChanged(player));
        }
    }

    /// Flips the next tile from the bag. Starts the game if it has not
    /// started yet. Returns the index of the new tile.
    pub fn turn(&mut self, player: usize) -> Option<usize> {
        if !self.connected_player(player) {
            return None;
        }

        self.start();

        let letter = self.tile_bag.pop()?;
        let num = self.tiles.len();
        self.tiles.push(Tile {
            num,
            x: (num % TILE_COLUMNS) as i32 * TILE_SIZE,
            y: (num / TILE_COLUMNS) as i32 * TILE_SIZE,
            letter,
            last_player: Some(player),
        });
        self.changed_signal.emit(&ConversationChange::TileChanged(num));

        Some(num)
    }

    pub fn move_tile(&mut self, player: usize, tile: usize, x: i32, y: i32) {
        if !self.connected_player(player) {
            return;
        }

        let Some(t) = self.tiles.get_mut(tile) else {
            return;
        };
        if t.x == x && t.y == y && t.last_player == Some(player) {
            return;
        }

        t.x = x;
        t.y = y;
        t.last_player = Some(player);
        self.changed_signal
            .emit(&ConversationChange::TileChanged(tile));
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
