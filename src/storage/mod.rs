mod file;
#[cfg(test)]
pub mod memory;

use std::io;
use std::path::PathBuf;

use crate::swarm::PieceIndex;

pub use file::FilePieceStore;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is {actual} bytes, expected {expected}", path.display())]
    SourceSize {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("piece {0} is outside the file")]
    IndexOutOfRange(PieceIndex),
}

pub trait PieceStore: Send + Sync + 'static {
    fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, StorageError>;

    /// the piece must be durable when this returns.
    fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError>;

    /// concatenate every piece into the final file.
    fn assemble_file(&self) -> Result<(), StorageError>;
}
