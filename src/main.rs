mod choking;
mod cli;
mod completion;
mod config;
mod logging;
mod peer_process;
mod peer_protocol;
mod peers;
mod prelude;
mod storage;
mod swarm;

use cli::Cli;

use anyhow::Context;
use clap::Parser;
use config::Settings;
use peer_process::PeerProcess;
use prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let matches = Cli::parse();
    let _log_guard = logging::init(&matches.work_dir, matches.peer_id, matches.verbose)?;

    let settings = Settings::load(&matches.config_dir, matches.peer_id)
        .context("failed to load the swarm configuration")?;

    let process = PeerProcess::new(
        settings,
        matches.work_dir,
        Duration::from_secs(matches.poll_secs),
        Duration::from_secs(matches.grace_secs),
    );
    process
        .run()
        .await
        .inspect_err(|err| error!("peer {} stopped: {err:#}", matches.peer_id))
}
