use rand::{seq::SliceRandom, Rng};
use std::sync::Arc;
use std::time::Duration;

use crate::peers::{SessionHandle, UnchokeKind};
use crate::prelude::*;
use crate::swarm::SwarmState;

/// rotates the single optimistic slot among the interested peers, one per interval.
pub struct OptimisticScheduler {
    swarm: Arc<SwarmState>,
    interval: Duration,
}

impl OptimisticScheduler {
    pub fn new(swarm: Arc<SwarmState>, interval: Duration) -> Self {
        Self { swarm, interval }
    }

    #[instrument(name = "optimistic scheduler", level = "info", skip_all)]
    pub async fn run(self) {
        let shutdown = self.swarm.shutdown_token().clone();

        loop {
            let chosen = self.begin_round(&mut rand::thread_rng());

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if let Some(handle) = chosen {
                self.end_round(&handle);
            }
        }
        debug!("optimistic scheduler stopped");
    }

    /// unchokes a random interested peer without adding it to the unchoked set.
    pub fn begin_round<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<SessionHandle>> {
        let candidates: Vec<_> = self
            .swarm
            .interested_peers()
            .into_iter()
            .filter_map(|peer_id| self.swarm.session(peer_id))
            .collect();
        let handle = candidates.choose(rng)?.clone();

        self.swarm.set_optimistic(handle.peer_id());
        if let Err(err) = handle.unchoke(&self.swarm, UnchokeKind::Optimistic) {
            debug!(peer = %handle.peer_id(), %err, "could not unchoke");
        }
        info!(peer = %handle.peer_id(), "has the optimistically unchoked neighbor");
        Some(handle)
    }

    /// frees the slot and chokes the peer again unless the choke scheduler picked it meanwhile.
    pub fn end_round(&self, handle: &SessionHandle) {
        self.swarm.clear_optimistic_if(handle.peer_id());
        if handle.is_unchoked() {
            return;
        }
        if let Err(err) = handle.choke(&self.swarm) {
            debug!(peer = %handle.peer_id(), %err, "could not choke");
        }
    }
}
