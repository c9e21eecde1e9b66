//! Accept-token computation for the connection handshake.
//!
//! The client sends a random base64 key in a `Sec-WebSocket-Key` header. The
//! server hashes the trimmed key together with a fixed GUID and returns the
//! base64 of the SHA-1 digest as `Sec-WebSocket-Accept`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing.
pub const WS_KEY_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Length of a SHA-1 digest.
pub const KEY_HASH_LEN: usize = 20;

pub type KeyHash = [u8; KEY_HASH_LEN];

/// Hashes a client key the same way the server's parser does.
pub fn key_hash(key: &str) -> KeyHash {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WS_KEY_GUID.as_bytes());
    finish(hasher)
}

fn finish(hasher: Sha1) -> KeyHash {
    let digest = hasher.finalize();
    let mut hash = [0u8; KEY_HASH_LEN];
    hash.copy_from_slice(&digest);
    hash
}

/// Encodes a key hash as the `Sec-WebSocket-Accept` header value.
pub fn accept_token(hash: &KeyHash) -> String {
    STANDARD.encode(hash)
}

/// Encodes raw nonce bytes as a `Sec-WebSocket-Key` header value.
pub fn encode_key(nonce: &[u8; 16]) -> String {
    STANDARD.encode(nonce)
}
