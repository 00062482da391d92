use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{COMMON_CFG, PEER_INFO_CFG};

#[derive(Debug, Clone)]
pub struct ConfigDir(pub PathBuf);

impl ConfigDir {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, anyhow::Error> {
        let path: PathBuf = path.into();

        if !path.is_dir() {
            anyhow::bail!("could not find directory at {}", path.display());
        }

        for name in [COMMON_CFG, PEER_INFO_CFG] {
            if !path.join(name).is_file() {
                anyhow::bail!("could not find {name} in {}", path.display());
            }
        }

        Ok(ConfigDir(path))
    }
}

impl FromStr for ConfigDir {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = PathBuf::from(s);
        Self::new(path)
    }
}

impl AsRef<Path> for ConfigDir {
    fn as_ref(&self) -> &Path {
        self.0.as_ref()
    }
}
