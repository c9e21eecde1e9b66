//! Canonical game model on the client.
//!
//! Events arrive from the connection on the network thread. They are copied
//! into a queue and a single flush is scheduled on the main thread, which
//! applies them to the model in arrival order and then re-broadcasts them
//! to the presentation layer.
//!
//! Lock order: connection, then event queue, then main-thread idle queue.
//! The model lock is never held while events are broadcast.

use crate::connection::Connection;
use crate::main_thread::{IdleToken, MainThread};
use crate::tile_arena::{GameTile, TileArena};
use log::debug;
use parking_lot::Mutex;
use shared::{ConnectionEvent, ListenerId, PlayerFlags, Signal, TileBitset, N_VISIBLE_PLAYERS};
use std::sync::{Arc, Weak};

/// Who is shouting, relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShoutState {
    NoOne,
    SelfShouting,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerInfo {
    pub name: Option<String>,
    pub flags: PlayerFlags,
}

/// Counters describing the event queue's slot usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Events waiting for the next flush
    pub pending: usize,
    /// Slots available for reuse
    pub freed: usize,
    /// Slots allocated over the queue's lifetime
    pub allocated: usize,
}

struct Model {
    self_num: Option<usize>,
    players: [PlayerInfo; N_VISIBLE_PLAYERS],
    shout_state: ShoutState,
    shouting_player: Option<usize>,
    tiles: TileArena,
    time_counter: u64,
}

impl Model {
    fn new() -> Self {
        Self {
            self_num: None,
            players: Default::default(),
            shout_state: ShoutState::NoOne,
            shouting_player: None,
            tiles: TileArena::new(),
            time_counter: 0,
        }
    }

    fn apply(&mut self, event: &ConnectionEvent) {
        self.time_counter += 1;

        match event {
            ConnectionEvent::Header { self_num } => {
                self.self_num = Some(*self_num);
            }
            ConnectionEvent::PlayerNameChanged { player_num, name } => {
                if let Some(player) = self.players.get_mut(*player_num) {
                    player.name = Some(name.clone());
                }
            }
            ConnectionEvent::PlayerFlagsChanged { player_num, flags } => {
                if let Some(player) = self.players.get_mut(*player_num) {
                    player.flags = (player.flags & PlayerFlags::SHOUTING) | *flags;
                }
            }
            ConnectionEvent::PlayerShoutingChanged {
                player_num,
                shouting,
            } => self.set_shouting(*player_num, *shouting),
            ConnectionEvent::TileChanged {
                num,
                x,
                y,
                letter,
                last_player_moved,
                ..
            } => {
                if *num >= TileBitset::CAPACITY {
                    return;
                }

                let update_time = self.time_counter;
                let last_moved_by_self =
                    last_player_moved.is_some() && *last_player_moved == self.self_num;

                let tile = self.tiles.get_or_insert(*num);
                tile.x = *x;
                tile.y = *y;
                tile.letter = *letter;
                tile.update_time = update_time;
                tile.last_moved_by_self = last_moved_by_self;

                self.tiles.move_to_tail(*num);
            }
            _ => {}
        }
    }

    fn set_shouting(&mut self, player_num: usize, shouting: bool) {
        if let Some(player) = self.players.get_mut(player_num) {
            player.flags.set(PlayerFlags::SHOUTING, shouting);
        }

        if shouting {
            self.shouting_player = Some(player_num);
            self.shout_state = if self.self_num == Some(player_num) {
                ShoutState::SelfShouting
            } else {
                ShoutState::Other
            };
        } else if self.shouting_player == Some(player_num) {
            self.shouting_player = None;
            self.shout_state = ShoutState::NoOne;
        }
    }
}

/// A reusable event slot.
struct QueuedEvent {
    event: Option<ConnectionEvent>,
}

#[derive(Default)]
struct EventQueue {
    pending: Vec<Box<QueuedEvent>>,
    freed: Vec<Box<QueuedEvent>>,
    flush_token: Option<IdleToken>,
    allocated: usize,
}

struct Inner {
    model: Mutex<Model>,
    queue: Mutex<EventQueue>,
    event_signal: Mutex<Signal<ConnectionEvent>>,
    main_thread: Arc<MainThread>,
}

pub struct GameState {
    inner: Arc<Inner>,
    connection: Arc<Mutex<Connection>>,
    listener: ListenerId,
}

impl GameState {
    pub fn new(connection: Arc<Mutex<Connection>>, main_thread: Arc<MainThread>) -> Self {
        let inner = Arc::new(Inner {
            model: Mutex::new(Model::new()),
            queue: Mutex::new(EventQueue::default()),
            event_signal: Mutex::new(Signal::new()),
            main_thread,
        });

        let producer = Arc::downgrade(&inner);
        let listener = connection.lock().subscribe(move |event| {
            if let Some(inner) = producer.upgrade() {
                queue_event(&inner, event);
            }
        });

        Self {
            inner,
            connection,
            listener,
        }
    }

    /// Registers a listener for events after they have been applied. Runs
    /// on the main thread; it must not subscribe or unsubscribe itself.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.inner.event_signal.lock().subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.event_signal.lock().unsubscribe(id)
    }

    pub fn shout(&self) {
        self.bump_time();
        self.connection.lock().shout();
    }

    pub fn turn(&self) {
        self.bump_time();
        self.connection.lock().turn();
    }

    pub fn move_tile(&self, tile: usize, x: i32, y: i32) {
        self.bump_time();
        self.connection.lock().move_tile(tile, x, y);
    }

    pub fn send_message(&self, text: &str) {
        self.connection.lock().send_message(text);
    }

    pub fn leave(&self) {
        self.connection.lock().leave();
    }

    fn bump_time(&self) {
        self.inner.model.lock().time_counter += 1;
    }

    /// Logical clock. Grows by one for every applied event and every
    /// command issued through this state.
    pub fn time_counter(&self) -> u64 {
        self.inner.model.lock().time_counter
    }

    pub fn self_num(&self) -> Option<usize> {
        self.inner.model.lock().self_num
    }

    pub fn shout_state(&self) -> ShoutState {
        self.inner.model.lock().shout_state
    }

    pub fn shouting_player(&self) -> Option<usize> {
        self.inner.model.lock().shouting_player
    }

    pub fn player(&self, player_num: usize) -> Option<PlayerInfo> {
        self.inner.model.lock().players.get(player_num).cloned()
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.inner.model.lock().players.to_vec()
    }

    pub fn tile(&self, number: usize) -> Option<GameTile> {
        self.inner.model.lock().tiles.get(number).cloned()
    }

    /// Tiles from the least to the most recently updated.
    pub fn tiles(&self) -> Vec<GameTile> {
        self.inner.model.lock().tiles.iter().cloned().collect()
    }

    pub fn n_tiles(&self) -> usize {
        self.inner.model.lock().tiles.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        let queue = self.inner.queue.lock();
        QueueStats {
            pending: queue.pending.len(),
            freed: queue.freed.len(),
            allocated: queue.allocated,
        }
    }
}

impl Drop for GameState {
    fn drop(&mut self) {
        self.connection.lock().unsubscribe(self.listener);

        let token = self.inner.queue.lock().flush_token.take();
        if let Some(token) = token {
            self.inner.main_thread.cancel_idle(token);
        }
    }
}

/// Copies an event into the queue. Runs on the network thread.
fn queue_event(inner: &Arc<Inner>, event: &ConnectionEvent) {
    if !event.is_public() {
        return;
    }

    let mut queue = inner.queue.lock();

    let mut slot = match queue.freed.pop() {
        Some(slot) => slot,
        None => {
            queue.allocated += 1;
            Box::new(QueuedEvent { event: None })
        }
    };
    slot.event = Some(event.clone());
    queue.pending.push(slot);

    if queue.flush_token.is_none() {
        let consumer: Weak<Inner> = Arc::downgrade(inner);
        let token = inner.main_thread.queue_idle(move || {
            if let Some(inner) = consumer.upgrade() {
                flush_queue(&inner);
            }
        });
        queue.flush_token = Some(token);
    }
}

/// Applies every queued event. Runs on the main thread.
fn flush_queue(inner: &Inner) {
    let mut batch = {
        let mut queue = inner.queue.lock();
        queue.flush_token = None;
        std::mem::take(&mut queue.pending)
    };

    debug!("Applying {} events", batch.len());

    for slot in batch.iter_mut() {
        if let Some(event) = slot.event.take() {
            inner.model.lock().apply(&event);
            inner.event_signal.lock().emit(&event);
        }
    }

    inner.queue.lock().freed.append(&mut batch);
}
