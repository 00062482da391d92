use std::collections::BTreeSet;
use std::path::Path;

use super::{non_empty_lines, read_config, ConfigError};
use crate::swarm::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_file: bool,
}

impl PeerInfo {
    fn parse(line: usize, text: &str) -> Result<Self, ConfigError> {
        let words: Vec<_> = text.split_whitespace().collect();
        let &[id, host, port, has_file] = words.as_slice() else {
            return Err(ConfigError::Malformed {
                line,
                expected: "id host port has_file",
                got: text.to_string(),
            });
        };

        let id = id
            .parse::<PeerId>()
            .map_err(|source| ConfigError::BadPeerId { line, source })?;
        let port = port.parse::<u16>().map_err(|_| ConfigError::NotANumber {
            line,
            field: "port",
            value: port.to_string(),
        })?;
        let has_file = match has_file {
            "0" => false,
            "1" => true,
            value => {
                return Err(ConfigError::BadHasFile {
                    line,
                    value: value.to_string(),
                })
            }
        };

        Ok(Self {
            id,
            host: host.to_string(),
            port,
            has_file,
        })
    }
}

/// every peer of the swarm in `PeerInfo.cfg` order, plus where the local peer sits.
/// peers before the local one get dialed, the ones after it dial us.
#[derive(Debug, Clone)]
pub struct Membership {
    peers: Vec<PeerInfo>,
    local_index: usize,
}

impl Membership {
    pub fn new(peers: Vec<PeerInfo>, local_id: PeerId) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        if let Some(peer) = peers.iter().find(|peer| !seen.insert(peer.id)) {
            return Err(ConfigError::DuplicatePeer(peer.id));
        }

        let local_index = peers
            .iter()
            .position(|peer| peer.id == local_id)
            .ok_or(ConfigError::LocalPeerMissing(local_id))?;

        Ok(Self { peers, local_index })
    }

    pub fn from_file(path: impl AsRef<Path>, local_id: PeerId) -> Result<Self, ConfigError> {
        Self::parse(&read_config(path.as_ref())?, local_id)
    }

    pub fn parse(contents: &str, local_id: PeerId) -> Result<Self, ConfigError> {
        let peers = non_empty_lines(contents)
            .map(|(line, text)| PeerInfo::parse(line, text))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(peers, local_id)
    }

    pub fn local(&self) -> &PeerInfo {
        &self.peers[self.local_index]
    }

    pub fn swarm_size(&self) -> usize {
        self.peers.len()
    }

    pub fn earlier_peers(&self) -> &[PeerInfo] {
        &self.peers[..self.local_index]
    }

    pub fn later_peers(&self) -> &[PeerInfo] {
        &self.peers[self.local_index + 1..]
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.iter().find(|peer| peer.id == id)
    }
}
