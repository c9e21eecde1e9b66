//! Person id generation.

use shared::NetAddress;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

/// Generates a hard-to-guess 64-bit id for a person connecting from
/// `remote`. Ids act as the only credential for later requests, so they mix
/// fresh randomness with a per-process keyed hash of the address.
pub fn generate_id(remote: &NetAddress) -> u64 {
    let random: u64 = rand::random();
    let salted = RandomState::new().hash_one(remote);
    random ^ salted.rotate_left(17)
}
