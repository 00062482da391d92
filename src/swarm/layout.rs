use super::PieceIndex;

/// how the shared file is cut into pieces. every piece is `piece_size` long except the
/// last, which holds whatever remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceLayout {
    file_size: u64,
    piece_size: usize,
    n_pieces: usize,
}

impl PieceLayout {
    /// `None` when either size is zero.
    pub fn new(file_size: u64, piece_size: usize) -> Option<Self> {
        if file_size == 0 || piece_size == 0 {
            return None;
        }

        let n_pieces = file_size.div_ceil(piece_size as u64) as usize;
        Some(Self {
            file_size,
            piece_size,
            n_pieces,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn piece_size(&self) -> usize {
        self.piece_size
    }

    pub fn n_pieces(&self) -> usize {
        self.n_pieces
    }

    pub fn piece_len(&self, index: PieceIndex) -> Option<usize> {
        if index >= self.n_pieces {
            return None;
        }

        let offset = index as u64 * self.piece_size as u64;
        Some(std::cmp::min(self.piece_size as u64, self.file_size - offset) as usize)
    }
}
