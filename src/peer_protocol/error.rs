use crate::swarm::{PeerId, PeerIdError};

/// a neighbor broke the wire protocol, fatal to that connection only.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame declared a zero length")]
    EmptyFrame,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("connection closed with {buffered} bytes of an unfinished frame")]
    TruncatedFrame { buffered: usize },

    #[error("invalid protocol tag for peer message: {0}")]
    UnknownTag(u8),

    #[error("payload of {len} bytes is invalid for a {kind} message")]
    PayloadLength { kind: &'static str, len: usize },

    #[error("bitfield entry {0} is neither 0 nor 1")]
    BitfieldValue(u32),

    #[error("unknown handshake header '{0}'")]
    BadMagic(String),

    #[error("invalid peer id in handshake: {0}")]
    BadPeerId(#[from] PeerIdError),

    #[error("dialed peer {expected} but handshake came from peer {claimed}")]
    UnexpectedPeer { expected: PeerId, claimed: PeerId },

    #[error("peer {0} is not a member of this swarm")]
    UnknownPeer(PeerId),

    #[error("peer {0} already has an active session")]
    DuplicateSession(PeerId),

    #[error("bitfield has {got} entries, expected {expected}")]
    BitfieldLength { got: usize, expected: usize },

    #[error("piece index {index} out of range for {n_pieces} pieces")]
    IndexOutOfRange { index: u32, n_pieces: usize },

    #[error("piece {index} carried {got} bytes, expected {expected}")]
    PieceLength {
        index: u32,
        got: usize,
        expected: usize,
    },
}
