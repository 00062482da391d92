use rand::{seq::SliceRandom, Rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::peers::UnchokeKind;
use crate::prelude::*;
use crate::swarm::{format_ids, PeerId, SwarmState};

/// outcome of one choke cycle over the interested peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub preferred: Vec<PeerId>,
    pub choked: Vec<PeerId>,
}

/// every interested peer when there are at most `k`, otherwise `k` of them drawn
/// uniformly at random with the rest choked.
pub fn select_preferred<R: Rng + ?Sized>(interested: &[PeerId], k: usize, rng: &mut R) -> Selection {
    let mut candidates = interested.to_vec();
    if candidates.len() <= k {
        return Selection {
            preferred: candidates,
            choked: Vec::new(),
        };
    }

    let (preferred, choked) = candidates.partial_shuffle(rng, k);
    Selection {
        preferred: preferred.to_vec(),
        choked: choked.to_vec(),
    }
}

pub struct ChokeScheduler {
    swarm: Arc<SwarmState>,
    preferred_neighbors: usize,
    interval: Duration,
}

impl ChokeScheduler {
    pub fn new(swarm: Arc<SwarmState>, preferred_neighbors: usize, interval: Duration) -> Self {
        Self {
            swarm,
            preferred_neighbors,
            interval,
        }
    }

    /// first cycle runs right away, then once per unchoking interval until shutdown.
    #[instrument(name = "choke scheduler", level = "info", skip_all)]
    pub async fn run(self) {
        let shutdown = self.swarm.shutdown_token().clone();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_cycle();
        }
        debug!("choke scheduler stopped");
    }

    pub fn run_cycle(&self) -> Selection {
        self.cycle_with(&mut rand::thread_rng())
    }

    pub fn cycle_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Selection {
        let swarm = &self.swarm;
        let interested = swarm.interested_peers();

        if interested.len() > self.preferred_neighbors {
            // NOTE: the ranking is reported but unused, preferred peers are drawn at random.
            debug!(ranking = ?swarm.ranked_by_rate(), "download rates this interval");
        }
        let selection = select_preferred(&interested, self.preferred_neighbors, rng);

        for peer_id in &selection.preferred {
            let Some(handle) = swarm.session(*peer_id) else {
                continue;
            };
            if handle.is_unchoked() {
                continue;
            }
            if let Err(err) = handle.unchoke(swarm, UnchokeKind::Preferred) {
                debug!(peer = %peer_id, %err, "could not unchoke");
            }
        }
        for peer_id in &selection.choked {
            let Some(handle) = swarm.session(*peer_id) else {
                continue;
            };
            if let Err(err) = handle.choke(swarm) {
                debug!(peer = %peer_id, %err, "could not choke");
            }
        }

        info!(preferred = %format_ids(&selection.preferred), "has the preferred neighbors");
        swarm.reset_rates();
        selection
    }
}
