use shared::AddressError;

/// Errors produced by the client's network side.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("could not resolve {0}")]
    Resolve(String),
}

impl From<shared::wire::FrameError> for ClientError {
    fn from(e: shared::wire::FrameError) -> Self {
        ClientError::Protocol(e.to_string())
    }
}
