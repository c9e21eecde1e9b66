//! Index-based storage for the tiles the client has seen.
//!
//! Slots live in a `Vec` and are never freed while the arena exists. A
//! separate table maps tile numbers to slots, and the slots are threaded on
//! a doubly-linked recency list by slot index: head is the tile updated
//! longest ago, tail the most recent.

/// Client-side view of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTile {
    pub number: usize,
    pub x: i32,
    pub y: i32,
    pub letter: char,
    /// Logical clock value when the tile was last updated
    pub update_time: u64,
    pub last_moved_by_self: bool,
}

impl GameTile {
    fn new(number: usize) -> Self {
        Self {
            number,
            x: 0,
            y: 0,
            letter: ' ',
            update_time: 0,
            last_moved_by_self: false,
        }
    }
}

struct Slot {
    tile: GameTile,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
pub struct TileArena {
    slots: Vec<Slot>,
    by_number: Vec<Option<usize>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, number: usize) -> Option<&GameTile> {
        self.slot_of(number).map(|slot| &self.slots[slot].tile)
    }

    /// Returns the tile with the given number, creating it at the tail of
    /// the recency list on first sight.
    pub fn get_or_insert(&mut self, number: usize) -> &mut GameTile {
        let slot = match self.slot_of(number) {
            Some(slot) => slot,
            None => {
                let slot = self.slots.len();
                self.slots.push(Slot {
                    tile: GameTile::new(number),
                    prev: None,
                    next: None,
                });
                if self.by_number.len() <= number {
                    self.by_number.resize(number + 1, None);
                }
                self.by_number[number] = Some(slot);
                self.link_tail(slot);
                slot
            }
        };

        &mut self.slots[slot].tile
    }

    /// Marks a tile as the most recently updated one.
    pub fn move_to_tail(&mut self, number: usize) {
        let Some(slot) = self.slot_of(number) else {
            return;
        };
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.link_tail(slot);
    }

    /// Tiles from the least to the most recently updated.
    pub fn iter(&self) -> RecencyIter<'_> {
        RecencyIter {
            arena: self,
            next: self.head,
        }
    }

    fn slot_of(&self, number: usize) -> Option<usize> {
        self.by_number.get(number).copied().flatten()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);

        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }

        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn link_tail(&mut self, slot: usize) {
        self.slots[slot].prev = self.tail;
        self.slots[slot].next = None;

        match self.tail {
            Some(tail) => self.slots[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}

pub struct RecencyIter<'a> {
    arena: &'a TileArena,
    next: Option<usize>,
}

impl<'a> Iterator for RecencyIter<'a> {
    type Item = &'a GameTile;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = &self.arena.slots[self.next?];
        self.next = slot.next;
        Some(&slot.tile)
    }
}
