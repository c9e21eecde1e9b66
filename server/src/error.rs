//! Error types for the server.

use shared::AddressError;

/// Reasons a handshake is rejected. Every variant is fatal to the
/// connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Unsupported line length in HTTP request")]
    UnsupportedLineLength,
    #[error("Unsupported HTTP version")]
    UnsupportedVersion,
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}
