mod common;
mod error;
mod peer_info;

use std::fs;
use std::path::Path;

use crate::swarm::PeerId;

pub use common::CommonConfig;
pub use error::ConfigError;
pub use peer_info::{Membership, PeerInfo};

pub const COMMON_CFG: &str = "Common.cfg";
pub const PEER_INFO_CFG: &str = "PeerInfo.cfg";

/// both configuration files, loaded before anything touches the network.
#[derive(Debug, Clone)]
pub struct Settings {
    pub common: CommonConfig,
    pub membership: Membership,
}

impl Settings {
    pub fn load(config_dir: impl AsRef<Path>, local_id: PeerId) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        Ok(Self {
            common: CommonConfig::from_file(config_dir.join(COMMON_CFG))?,
            membership: Membership::from_file(config_dir.join(PEER_INFO_CFG), local_id)?,
        })
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// trimmed lines with their 1-based line numbers, blank lines skipped.
fn non_empty_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(index, text)| (index + 1, text.trim()))
        .filter(|(_, text)| !text.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(COMMON_CFG),
            "NumberOfPreferredNeighbors 1\nUnchokingInterval 2\nOptimisticUnchokingInterval 4\n\
             FileName thefile\nFileSize 100\nPieceSize 30\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(PEER_INFO_CFG),
            "1001 localhost 6001 1\n1002 localhost 6002 0\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path(), PeerId::new(1002).unwrap()).unwrap();
        assert_eq!(settings.common.layout.n_pieces(), 4);
        assert_eq!(settings.membership.local().port, 6002);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(dir.path(), PeerId::new(1001).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { path, .. } if path.ends_with(COMMON_CFG)));
    }
}
