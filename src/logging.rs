use anyhow::Context;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::swarm::PeerId;

pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

pub fn log_file_name(peer_id: PeerId) -> String {
    format!("log_peer_{peer_id}.log")
}

/// logs to stdout and to `log_peer_<id>.log` in the work directory. `RUST_LOG` overrides
/// the level picked by `-v`. the returned guard flushes the file on drop.
pub fn init(work_dir: &Path, peer_id: PeerId, verbosity: u8) -> anyhow::Result<WorkerGuard> {
    let level = level_for(verbosity);
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_file_name(peer_id))
        .build(work_dir)
        .with_context(|| format!("failed to open the log file in {}", work_dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let stdout = tracing_subscriber::fmt::layer()
        .with_target(level > LevelFilter::INFO)
        .with_filter(filter());
    let file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .context("failed to install the tracing subscriber")?;
    Ok(guard)
}
