use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::choking::{ChokeScheduler, OptimisticScheduler};
use crate::completion::CompletionMonitor;
use crate::config::Settings;
use crate::peers::{ConnectionManager, SessionContext};
use crate::prelude::*;
use crate::storage::{FilePieceStore, PieceStore};
use crate::swarm::SwarmState;

/// wires one peer together: storage, shared state, both connection roles and the
/// background schedulers, then waits for the swarm to finish.
pub struct PeerProcess {
    settings: Settings,
    work_dir: PathBuf,
    poll: Duration,
    grace: Duration,
}

impl PeerProcess {
    pub fn new(settings: Settings, work_dir: impl Into<PathBuf>, poll: Duration, grace: Duration) -> Self {
        Self {
            settings,
            work_dir: work_dir.into(),
            poll,
            grace,
        }
    }

    /// `Ok` once the swarm completed, `Err` on anything that keeps this peer from taking part.
    #[instrument(name = "peer process", level = "info", skip_all, fields(peer = %self.settings.membership.local().id))]
    pub async fn run(self) -> anyhow::Result<()> {
        let Settings { common, membership } = self.settings;
        let local = membership.local().clone();
        info!(
            preferred_neighbors = common.preferred_neighbors,
            unchoking_interval = ?common.unchoking_interval,
            optimistic_interval = ?common.optimistic_interval,
            file_name = %common.file_name,
            file_size = common.layout.file_size(),
            piece_size = common.layout.piece_size(),
            n_pieces = common.layout.n_pieces(),
            swarm_size = membership.swarm_size(),
            has_file = local.has_file,
            "starting peer"
        );

        let store = FilePieceStore::create(&self.work_dir, local.id, &common.file_name, common.layout)
            .context("failed to create the piece directory")?;
        if local.has_file {
            store
                .split_source(self.work_dir.join(&common.file_name))
                .context("failed to split the shared file into pieces")?;
            store
                .assemble_file()
                .context("failed to write the complete file")?;
        }

        let shutdown = CancellationToken::new();
        let swarm = Arc::new(SwarmState::new(
            local.id,
            membership.swarm_size(),
            common.layout,
            local.has_file,
            shutdown.clone(),
        ));
        let ctx = SessionContext {
            swarm: swarm.clone(),
            store: Arc::new(store),
        };
        let manager = ConnectionManager::new(Arc::new(membership), ctx);

        // bind before dialing so later peers never find the port closed.
        let listener = manager
            .bind()
            .await
            .with_context(|| format!("failed to listen on port {}", local.port))?;

        let mut tasks = JoinSet::new();
        tasks.spawn({
            let manager = manager.clone();
            async move { manager.accept_later_peers(listener).await }
        });
        tasks.spawn(async move { manager.dial_earlier_peers().await });
        tasks.spawn(
            ChokeScheduler::new(
                swarm.clone(),
                common.preferred_neighbors,
                common.unchoking_interval,
            )
            .run(),
        );
        tasks.spawn(OptimisticScheduler::new(swarm.clone(), common.optimistic_interval).run());
        tasks.spawn(CompletionMonitor::new(swarm.clone(), self.poll, self.grace).run());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next() => {
                    if let Err(err) = joined {
                        shutdown.cancel();
                        return Err(err).context("a peer task failed");
                    }
                }
            }
        }

        tasks.shutdown().await;
        info!(
            have = swarm.bitfield().count_have(),
            completed = swarm.completed_count(),
            "peer finished"
        );
        Ok(())
    }
}
