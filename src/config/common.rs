use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::{non_empty_lines, read_config, ConfigError};
use crate::swarm::PieceLayout;

/// the swarm wide parameters every peer reads from `Common.cfg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    pub preferred_neighbors: usize,
    pub unchoking_interval: Duration,
    pub optimistic_interval: Duration,
    pub file_name: String,
    pub layout: PieceLayout,
}

impl CommonConfig {
    const PREFERRED_NEIGHBORS: &'static str = "NumberOfPreferredNeighbors";
    const UNCHOKING_INTERVAL: &'static str = "UnchokingInterval";
    const OPTIMISTIC_INTERVAL: &'static str = "OptimisticUnchokingInterval";
    const FILE_NAME: &'static str = "FileName";
    const FILE_SIZE: &'static str = "FileSize";
    const PIECE_SIZE: &'static str = "PieceSize";

    const KEYS: [&'static str; 6] = [
        Self::PREFERRED_NEIGHBORS,
        Self::UNCHOKING_INTERVAL,
        Self::OPTIMISTIC_INTERVAL,
        Self::FILE_NAME,
        Self::FILE_SIZE,
        Self::PIECE_SIZE,
    ];

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&read_config(path.as_ref())?)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();

        for (line, text) in non_empty_lines(contents) {
            let mut words = text.split_whitespace();
            let (Some(key), Some(value), None) = (words.next(), words.next(), words.next()) else {
                return Err(ConfigError::Malformed {
                    line,
                    expected: "Key Value",
                    got: text.to_string(),
                });
            };

            let Some(key) = Self::KEYS.into_iter().find(|known| *known == key) else {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: key.to_string(),
                });
            };
            if entries.insert(key, (line, value)).is_some() {
                return Err(ConfigError::DuplicateKey {
                    line,
                    key: key.to_string(),
                });
            }
        }

        let value = |key: &'static str| {
            entries
                .get(key)
                .copied()
                .ok_or(ConfigError::MissingKey(key))
        };
        let number = |key| -> Result<u64, ConfigError> {
            let (line, value) = value(key)?;
            parse_number(line, key, value)
        };
        let seconds = |key| {
            number(key)
                .and_then(|secs| non_zero(key, secs))
                .map(Duration::from_secs)
        };

        let file_size = non_zero(Self::FILE_SIZE, number(Self::FILE_SIZE)?)?;
        let piece_size = non_zero(Self::PIECE_SIZE, number(Self::PIECE_SIZE)?)?;

        Ok(Self {
            preferred_neighbors: number(Self::PREFERRED_NEIGHBORS)? as usize,
            unchoking_interval: seconds(Self::UNCHOKING_INTERVAL)?,
            optimistic_interval: seconds(Self::OPTIMISTIC_INTERVAL)?,
            file_name: value(Self::FILE_NAME)?.1.to_string(),
            layout: PieceLayout::new(file_size, piece_size as usize)
                .ok_or(ConfigError::Zero(Self::PIECE_SIZE))?,
        })
    }
}

fn parse_number<T: FromStr>(line: usize, field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::NotANumber {
        line,
        field,
        value: value.to_string(),
    })
}

fn non_zero(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    match value {
        0 => Err(ConfigError::Zero(key)),
        value => Ok(value),
    }
}
