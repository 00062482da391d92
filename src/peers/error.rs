use crate::peer_protocol::{FrameError, ProtocolError};
use crate::storage::StorageError;

/// everything that can end a single session. none of these take the process down.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("peer closed the connection")]
    Closed,

    #[error("outbound queue closed, writer is gone")]
    OutboundClosed,
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => Self::Transport(err),
            FrameError::Malformed(err) => Self::Protocol(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
