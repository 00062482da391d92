use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{PieceStore, StorageError};
use crate::prelude::*;
use crate::swarm::{PeerId, PieceIndex, PieceLayout};

/// pieces live as `peer_<id>/<file>_<index>`, the assembled file as `peer_<id>/<file>`.
#[derive(Debug, Clone)]
pub struct FilePieceStore {
    dir: PathBuf,
    file_name: String,
    layout: PieceLayout,
}

fn io_error(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io {
        action,
        path,
        source,
    }
}

impl FilePieceStore {
    pub fn create(
        work_dir: impl AsRef<Path>,
        peer_id: PeerId,
        file_name: impl Into<String>,
        layout: PieceLayout,
    ) -> Result<Self, StorageError> {
        let dir = work_dir.as_ref().join(format!("peer_{peer_id}"));
        fs::create_dir_all(&dir).map_err(io_error("create directory", &dir))?;

        Ok(Self {
            dir,
            file_name: file_name.into(),
            layout,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn piece_path(&self, index: PieceIndex) -> PathBuf {
        self.dir.join(format!("{}_{}", self.file_name, index))
    }

    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// cut a complete copy of the file into piece files.
    #[instrument(level = "debug", skip_all)]
    pub fn split_source(&self, source: impl AsRef<Path>) -> Result<(), StorageError> {
        let source = source.as_ref();
        let mut file = File::open(source).map_err(io_error("open", source))?;

        let actual = file
            .metadata()
            .map_err(io_error("stat", source))?
            .len();
        if actual != self.layout.file_size() {
            return Err(StorageError::SourceSize {
                path: source.to_path_buf(),
                actual,
                expected: self.layout.file_size(),
            });
        }

        for index in 0..self.layout.n_pieces() {
            let mut piece = vec![0; self.piece_len(index)?];
            file.read_exact(&mut piece).map_err(io_error("read", source))?;
            self.write_piece(index, &piece)?;
        }

        debug!(n_pieces = self.layout.n_pieces(), "split source file into pieces");
        Ok(())
    }

    fn piece_len(&self, index: PieceIndex) -> Result<usize, StorageError> {
        self.layout
            .piece_len(index)
            .ok_or(StorageError::IndexOutOfRange(index))
    }
}

impl PieceStore for FilePieceStore {
    fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, StorageError> {
        self.piece_len(index)?;
        let path = self.piece_path(index);
        fs::read(&path).map_err(io_error("read", &path))
    }

    fn write_piece(&self, index: PieceIndex, piece: &[u8]) -> Result<(), StorageError> {
        self.piece_len(index)?;
        let path = self.piece_path(index);

        // write aside then rename, readers never observe a half written piece.
        let partial = self.dir.join(format!("{}_{}.part", self.file_name, index));
        let mut file = File::create(&partial).map_err(io_error("create", &partial))?;
        file.write_all(piece).map_err(io_error("write", &partial))?;
        file.sync_all().map_err(io_error("sync", &partial))?;
        fs::rename(&partial, &path).map_err(io_error("rename", &partial))
    }

    #[instrument(level = "debug", skip_all)]
    fn assemble_file(&self) -> Result<(), StorageError> {
        let path = self.file_path();
        let file = File::create(&path).map_err(io_error("create", &path))?;
        let mut out = BufWriter::new(file);

        for index in 0..self.layout.n_pieces() {
            let piece_path = self.piece_path(index);
            let mut piece = File::open(&piece_path).map_err(io_error("open", &piece_path))?;
            io::copy(&mut piece, &mut out).map_err(io_error("copy", &piece_path))?;
        }

        out.flush().map_err(io_error("flush", &path))?;
        debug!(path = %path.display(), "assembled file");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    const CONTENTS: &[u8] = b"the quick brown fox jumps over the lazy dog";

    #[fixture]
    fn work_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn store(work_dir: &TempDir) -> FilePieceStore {
        let layout = PieceLayout::new(CONTENTS.len() as u64, 10).unwrap();
        FilePieceStore::create(work_dir.path(), PeerId::new(1001).unwrap(), "thefile", layout)
            .unwrap()
    }

    #[rstest]
    fn test_layout_on_disk(work_dir: TempDir) {
        let store = store(&work_dir);
        assert!(store.dir().ends_with("peer_1001"));
        assert!(store.dir().is_dir());
        assert!(store.piece_path(3).ends_with("peer_1001/thefile_3"));
    }

    #[rstest]
    fn test_split_then_assemble(work_dir: TempDir) {
        let source = work_dir.path().join("thefile");
        fs::write(&source, CONTENTS).unwrap();
        let store = store(&work_dir);

        store.split_source(&source).unwrap();
        assert_eq!(store.read_piece(0).unwrap(), &CONTENTS[..10]);
        assert_eq!(store.read_piece(4).unwrap(), &CONTENTS[40..]);

        store.assemble_file().unwrap();
        assert_eq!(fs::read(store.file_path()).unwrap(), CONTENTS);
    }

    #[rstest]
    fn test_split_rejects_wrong_size(work_dir: TempDir) {
        let source = work_dir.path().join("thefile");
        fs::write(&source, &CONTENTS[..20]).unwrap();

        assert!(matches!(
            store(&work_dir).split_source(&source),
            Err(StorageError::SourceSize { actual: 20, .. })
        ));
    }

    #[rstest]
    fn test_write_then_read(work_dir: TempDir) {
        let store = store(&work_dir);
        store.write_piece(2, b"0123456789").unwrap();
        assert_eq!(store.read_piece(2).unwrap(), b"0123456789");
        assert!(!store.dir().join("thefile_2.part").exists());
    }

    #[rstest]
    fn test_missing_and_out_of_range(work_dir: TempDir) {
        let store = store(&work_dir);
        assert!(matches!(store.read_piece(1), Err(StorageError::Io { .. })));
        assert!(matches!(
            store.write_piece(5, b""),
            Err(StorageError::IndexOutOfRange(5))
        ));
        assert!(store.assemble_file().is_err());
    }
}
