use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{PieceStore, StorageError};
use crate::swarm::PieceIndex;

/// keeps pieces in memory and counts writes, for session tests.
#[derive(Debug, Default)]
pub struct MemoryPieceStore {
    pieces: Mutex<BTreeMap<PieceIndex, Vec<u8>>>,
    writes: AtomicUsize,
    assembled: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryPieceStore {
    pub fn with_pieces(pieces: impl IntoIterator<Item = (PieceIndex, Vec<u8>)>) -> Self {
        let store = Self::default();
        store.pieces.lock().unwrap().extend(pieces);
        store
    }

    pub fn piece(&self, index: PieceIndex) -> Option<Vec<u8>> {
        self.pieces.lock().unwrap().get(&index).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_assembled(&self) -> bool {
        self.assembled.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn error(action: &'static str, index: PieceIndex) -> StorageError {
        StorageError::Io {
            action,
            path: PathBuf::from(format!("memory/{index}")),
            source: io::Error::new(io::ErrorKind::Other, "injected failure"),
        }
    }
}

impl PieceStore for MemoryPieceStore {
    fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, StorageError> {
        self.piece(index).ok_or_else(|| Self::error("read", index))
    }

    fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::error("write", index));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.pieces.lock().unwrap().insert(index, piece.to_vec());
        Ok(())
    }

    fn assemble_file(&self) -> Result<(), StorageError> {
        self.assembled.store(true, Ordering::SeqCst);
        Ok(())
    }
}
