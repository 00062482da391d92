use bitvec::{order::Msb0, prelude as bv};
use std::sync::atomic::{AtomicU8, Ordering};

use super::PieceIndex;

// snapshot of which pieces a neighbor has, one bit per piece index.
pub type Bitfield = bv::BitVec<u8, Msb0>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    Missing = 0,
    /// claimed by a session that is persisting the bytes.
    Pending = 1,
    Have = 2,
}

impl PieceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Missing,
            1 => Self::Pending,
            _ => Self::Have,
        }
    }
}

/// the local peer's possession vector, shared by every session.
///
/// an entry only ever moves `Missing -> Pending -> Have`; a failed persist may release
/// `Pending` back to `Missing`, but nothing leaves `Have`.
#[derive(Debug)]
pub struct LocalBitfield {
    pieces: Vec<AtomicU8>,
}

impl LocalBitfield {
    pub fn new(n_pieces: usize, complete: bool) -> Self {
        let initial = if complete {
            PieceState::Have
        } else {
            PieceState::Missing
        };

        Self {
            pieces: (0..n_pieces).map(|_| AtomicU8::new(initial as u8)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn state(&self, index: PieceIndex) -> Option<PieceState> {
        self.pieces
            .get(index)
            .map(|state| PieceState::from_u8(state.load(Ordering::Acquire)))
    }

    /// out of range indices are never held.
    pub fn has(&self, index: PieceIndex) -> bool {
        self.state(index) == Some(PieceState::Have)
    }

    pub fn is_missing(&self, index: PieceIndex) -> bool {
        self.state(index) == Some(PieceState::Missing)
    }

    /// claim a missing piece for persisting, at most one caller wins per index.
    pub fn try_claim(&self, index: PieceIndex) -> bool {
        self.transition(index, PieceState::Missing, PieceState::Pending)
    }

    pub fn commit(&self, index: PieceIndex) -> bool {
        self.transition(index, PieceState::Pending, PieceState::Have)
    }

    pub fn release(&self, index: PieceIndex) -> bool {
        self.transition(index, PieceState::Pending, PieceState::Missing)
    }

    fn transition(&self, index: PieceIndex, from: PieceState, to: PieceState) -> bool {
        self.pieces.get(index).is_some_and(|state| {
            state
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    pub fn count_have(&self) -> usize {
        (0..self.len()).filter(|index| self.has(*index)).count()
    }

    pub fn is_complete(&self) -> bool {
        (0..self.len()).all(|index| self.has(index))
    }

    /// pending pieces are reported as not held.
    pub fn snapshot(&self) -> Bitfield {
        (0..self.len()).map(|index| self.has(index)).collect()
    }
}
