use super::ProtocolError;
use crate::swarm::PeerId;

#[derive(Debug, Clone, PartialEq)]
#[repr(C)] // makes sure the struct fields are arranged in the same order, there's also no padding
           // in between because all the fields are byte aligned. (i.e this can be treated as a
           // simple array of bytes).
pub struct PeerHandshake {
    header: [u8; 18],
    zero_bits: [u8; 10],
    peer_id: [u8; PeerId::DIGITS],
}

pub type HandshakeBytes = [u8; std::mem::size_of::<PeerHandshake>()];

impl AsRef<HandshakeBytes> for PeerHandshake {
    fn as_ref(&self) -> &HandshakeBytes {
        unsafe { std::mem::transmute::<&Self, &HandshakeBytes>(self) }
    }
}

impl PeerHandshake {
    pub const HEADER: [u8; 18] = *b"P2PFILESHARINGPROJ";
    pub const LEN: usize = std::mem::size_of::<Self>();

    pub fn new(peer_id: PeerId) -> Self {
        Self {
            header: Self::HEADER,
            zero_bits: [0; 10],
            peer_id: peer_id.to_digits(),
        }
    }

    /// the zero bits are not checked, some peers fill them with ascii `'0'`.
    // the unsafe is fine becuase the struct is just plain old data, any sequence of bits is valid.
    pub fn from_bytes(bytes: HandshakeBytes) -> Result<Self, ProtocolError> {
        let handshake = unsafe { std::mem::transmute::<HandshakeBytes, Self>(bytes) };
        if handshake.header != Self::HEADER {
            return Err(ProtocolError::BadMagic(
                String::from_utf8_lossy(&handshake.header[..]).into_owned(),
            ));
        }

        Ok(handshake)
    }

    // the unsafe is fine becuase the struct is just plain old data, any sequence of bits is valid.
    pub fn into_bytes(self) -> HandshakeBytes {
        unsafe { std::mem::transmute::<Self, HandshakeBytes>(self) }
    }

    pub fn peer_id(&self) -> Result<PeerId, ProtocolError> {
        Ok(PeerId::from_digits(&self.peer_id)?)
    }
}
