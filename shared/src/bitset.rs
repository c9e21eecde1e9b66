//! Fixed-size bitsets with a lowest-index-first query.
//!
//! The server tracks which players and tiles still have to be sent to a
//! client as bitsets. When several bits are set the lowest index is always
//! handled first, so the order of frames on the wire is deterministic.

/// A bitset holding `WORDS * 64` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitset<const WORDS: usize> {
    words: [u64; WORDS],
}

/// Enough bits for every player slot in a conversation.
pub type PlayerBitset = Bitset<1>;

/// Enough bits for every tile in a game.
pub type TileBitset = Bitset<2>;

impl<const WORDS: usize> Bitset<WORDS> {
    /// Number of bits the set can hold.
    pub const CAPACITY: usize = WORDS * 64;

    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Sets or clears a bit. Indices beyond the capacity are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        let Some(word) = self.words.get_mut(index / 64) else {
            return;
        };
        let mask = 1u64 << (index % 64);

        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .map_or(false, |word| word & (1u64 << (index % 64)) != 0)
    }

    /// Sets every bit below `count`.
    pub fn set_range(&mut self, count: usize) {
        for index in 0..count.min(Self::CAPACITY) {
            self.set(index, true);
        }
    }

    /// Returns the lowest set bit, if any.
    pub fn first_set(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != 0)
            .map(|(i, word)| i * 64 + word.trailing_zeros() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words = [0; WORDS];
    }
}

impl<const WORDS: usize> Default for Bitset<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bitset() {
        let bits = TileBitset::new();
        assert!(bits.is_empty());
        assert_eq!(bits.first_set(), None);
        assert_eq!(bits.count(), 0);
    }

    #[test]
    fn test_first_set_prefers_lowest_index() {
        let mut bits = TileBitset::new();
        bits.set(100, true);
        bits.set(70, true);
        bits.set(3, true);

        assert_eq!(bits.first_set(), Some(3));
        bits.set(3, false);
        assert_eq!(bits.first_set(), Some(70));
        bits.set(70, false);
        assert_eq!(bits.first_set(), Some(100));
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut bits = PlayerBitset::new();
        bits.set(5, true);
        bits.set(5, true);
        assert_eq!(bits.count(), 1);
        assert!(bits.get(5));
        assert!(!bits.get(4));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut bits = PlayerBitset::new();
        bits.set(64, true);
        bits.set(1000, true);
        assert!(bits.is_empty());
        assert!(!bits.get(1000));
    }

    #[test]
    fn test_set_range_and_clear() {
        let mut bits = TileBitset::new();
        bits.set_range(66);
        assert_eq!(bits.count(), 66);
        assert!(bits.get(65));
        assert!(!bits.get(66));

        bits.clear();
        assert!(bits.is_empty());
    }
}
