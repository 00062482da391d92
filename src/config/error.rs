use std::io;
use std::path::PathBuf;

use crate::swarm::{PeerId, PeerIdError};

/// anything wrong with `Common.cfg` or `PeerInfo.cfg`. always fatal, nothing is
/// started before both files load.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("line {line}: expected `{expected}`, got '{got}'")]
    Malformed {
        line: usize,
        expected: &'static str,
        got: String,
    },

    #[error("line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: '{key}' was already set")]
    DuplicateKey { line: usize, key: String },

    #[error("missing key '{0}'")]
    MissingKey(&'static str),

    #[error("line {line}: {field} must be a number, got '{value}'")]
    NotANumber {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("line {line}: {source}")]
    BadPeerId {
        line: usize,
        #[source]
        source: PeerIdError,
    },

    #[error("line {line}: has_file must be 0 or 1, got '{value}'")]
    BadHasFile { line: usize, value: String },

    #[error("peer {0} is listed more than once")]
    DuplicatePeer(PeerId),

    #[error("local peer {0} is not listed")]
    LocalPeerMissing(PeerId),
}
