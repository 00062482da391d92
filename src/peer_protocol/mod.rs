pub mod codec;
pub mod handshake;

mod error;

pub use codec::{FrameError, PeerMessage};
pub use error::ProtocolError;
pub use handshake::PeerHandshake;
