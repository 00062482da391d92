use tokio_util::{
    bytes::{self, Buf, BufMut},
    codec::{Decoder, Encoder, Framed},
};

use super::ProtocolError;
use crate::swarm::{Bitfield, PieceLayout};

#[repr(u8)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have(u32) = 4,
    Bitfield(Bitfield) = 5,
    Request(u32) = 6,
    Piece { index: u32, piece: Vec<u8> } = 7,
    Complete = 8,
}

impl PeerMessage {
    pub fn tag(&self) -> u8 {
        // SAFETY: because PeerMessage is a repr(u8) its also repr(C) and the first byte(u8) represents
        // the enum tag (dereferencing the *self casted to a *u8 gives first byte).
        // taken from std::mem::discriminant docs.
        unsafe { *<*const _>::from(self).cast::<u8>() }
    }

    fn kind(tag: u8) -> &'static str {
        match tag {
            0 => "choke",
            1 => "unchoke",
            2 => "interested",
            3 => "not interested",
            4 => "have",
            5 => "bitfield",
            6 => "request",
            7 => "piece",
            _ => "complete",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
}

pub type PeerFrames<T> = Framed<T, PeerMessageCodec>;

pub fn upgrade_stream<T>(stream: T, layout: &PieceLayout) -> PeerFrames<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite,
{
    Framed::new(stream, PeerMessageCodec::for_layout(layout))
}

#[derive(Debug, Clone)]
pub struct PeerMessageCodec {
    max_frame_len: usize,
}

impl PeerMessageCodec {
    const LEN_HEADER_SIZE: usize = std::mem::size_of::<u32>();
    const TAG_LEN: usize = std::mem::size_of::<u8>();
    const INDEX_LEN: usize = std::mem::size_of::<u32>();

    /// `max_frame_len` bounds the declared length (tag + payload) of incoming frames.
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// largest frame a well behaved peer can send: a full piece or a full bitfield.
    pub fn for_layout(layout: &PieceLayout) -> Self {
        let largest_piece = Self::INDEX_LEN + layout.piece_size();
        let largest_bitfield = Self::INDEX_LEN * layout.n_pieces();
        Self::new(Self::TAG_LEN + std::cmp::max(largest_piece, largest_bitfield))
    }

    // bail if the payload length does not match what the variant requires.
    fn expect_len(tag: u8, src: &bytes::BytesMut, len: usize) -> Result<(), ProtocolError> {
        if src.len() != len {
            return Err(ProtocolError::PayloadLength {
                kind: PeerMessage::kind(tag),
                len: src.len(),
            });
        }
        Ok(())
    }

    fn decode_bitfield(src: &mut bytes::BytesMut) -> Result<Bitfield, ProtocolError> {
        if src.len() % Self::INDEX_LEN != 0 {
            return Err(ProtocolError::PayloadLength {
                kind: PeerMessage::kind(5),
                len: src.len(),
            });
        }

        let mut bitfield = Bitfield::with_capacity(src.len() / Self::INDEX_LEN);
        while src.has_remaining() {
            match src.get_u32() {
                0 => bitfield.push(false),
                1 => bitfield.push(true),
                value => return Err(ProtocolError::BitfieldValue(value)),
            }
        }
        Ok(bitfield)
    }
}

impl Decoder for PeerMessageCodec {
    type Item = PeerMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < Self::LEN_HEADER_SIZE {
            // return None to signify that more bytes need to be read for current frame to be
            // decoded.
            return Ok(None);
        }

        // peek, the header is only consumed once the whole frame is buffered.
        let len_header = (&src[..Self::LEN_HEADER_SIZE]).get_u32() as usize;
        if len_header == 0 {
            return Err(ProtocolError::EmptyFrame.into());
        }

        // prevent peers from making us buffer arbitrarily large frames.
        if len_header > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: len_header,
                max: self.max_frame_len,
            }
            .into());
        }

        let frame_len = Self::LEN_HEADER_SIZE + len_header;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(Self::LEN_HEADER_SIZE);
        let mut src = src.split_to(len_header);

        let tag = src.get_u8();
        type PM = PeerMessage;
        let msg = match tag {
            0..=3 | 8 => {
                Self::expect_len(tag, &src, 0)?;
                match tag {
                    0 => PM::Choke,
                    1 => PM::Unchoke,
                    2 => PM::Interested,
                    3 => PM::NotInterested,
                    _ => PM::Complete,
                }
            }
            4 => {
                Self::expect_len(tag, &src, Self::INDEX_LEN)?;
                PM::Have(src.get_u32())
            }
            5 => PM::Bitfield(Self::decode_bitfield(&mut src)?),
            6 => {
                Self::expect_len(tag, &src, Self::INDEX_LEN)?;
                PM::Request(src.get_u32())
            }
            7 => {
                if src.len() < Self::INDEX_LEN {
                    return Err(ProtocolError::PayloadLength {
                        kind: PM::kind(tag),
                        len: src.len(),
                    }
                    .into());
                }

                PM::Piece {
                    index: src.get_u32(),
                    piece: src.to_vec(),
                }
            }
            _ => return Err(ProtocolError::UnknownTag(tag).into()),
        };

        Ok(Some(msg))
    }

    fn decode_eof(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::TruncatedFrame {
                buffered: src.len(),
            }
            .into()),
        }
    }
}

impl Encoder<PeerMessage> for PeerMessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: PeerMessage, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        const TAG_LEN: u32 = PeerMessageCodec::TAG_LEN as u32;
        const INDEX_LEN: u32 = PeerMessageCodec::INDEX_LEN as u32;
        let tag = item.tag();

        type PM = PeerMessage;
        match item {
            PM::Choke | PM::Unchoke | PM::Interested | PM::NotInterested | PM::Complete => {
                dst.put_u32(TAG_LEN);
                dst.put_u8(tag);
            }
            PM::Have(index) | PM::Request(index) => {
                dst.put_u32(TAG_LEN + INDEX_LEN);
                dst.put_u8(tag);

                dst.put_u32(index);
            }
            PM::Bitfield(bitfield) => {
                dst.reserve(Self::LEN_HEADER_SIZE + Self::TAG_LEN + 4 * bitfield.len());
                dst.put_u32(TAG_LEN + INDEX_LEN * bitfield.len() as u32);
                dst.put_u8(tag);

                // one big endian u32 per piece. not bit packed.
                for has_piece in bitfield.iter().by_vals() {
                    dst.put_u32(has_piece as u32);
                }
            }
            PM::Piece { index, piece } => {
                dst.reserve(Self::LEN_HEADER_SIZE + Self::TAG_LEN + 4 + piece.len());
                dst.put_u32(TAG_LEN + INDEX_LEN + piece.len() as u32);
                dst.put_u8(tag);

                dst.put_u32(index);
                dst.put(piece.as_slice());
            }
        }
        Ok(())
    }
}
