use clap::{self, Parser};
use std::path::PathBuf;

use crate::swarm::PeerId;

pub mod config_dir;
use config_dir::ConfigDir;

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
/// a peer of a fixed membership swarm sharing one file.
pub struct Cli {
    #[arg(required = true)]
    /// id of this peer, it must be listed in PeerInfo.cfg.
    pub peer_id: PeerId,

    #[arg(short, long, default_value = ".")]
    /// directory holding Common.cfg and PeerInfo.cfg.
    pub config_dir: ConfigDir,

    #[arg(short, long, default_value = ".")]
    /// directory for the piece directory `peer_<id>/` and the log file.
    pub work_dir: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    /// more output per occurrence, debug then trace.
    pub verbose: u8,

    #[arg(long, default_value = "10")]
    /// seconds between checks for swarm wide completion.
    pub poll_secs: u64,

    #[arg(long, default_value = "10")]
    /// seconds to wait after broadcasting completion before exiting.
    pub grace_secs: u64,
}
