use crossbeam_skiplist::{SkipMap, SkipSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{LocalBitfield, PeerId, PieceLayout};
use crate::peer_protocol::ProtocolError;
use crate::peers::SessionHandle;

/// everything the sessions and the schedulers share, owned by the peer process and
/// handed around in an `Arc`.
///
/// the sets are lock free skiplists, iteration walks a consistent snapshot of live entries
/// and inserts/removes are idempotent.
#[derive(Debug)]
pub struct SwarmState {
    local_id: PeerId,
    swarm_size: usize,
    layout: PieceLayout,
    bitfield: LocalBitfield,
    local_complete: AtomicBool,

    interested: SkipSet<PeerId>,
    unchoked: SkipSet<PeerId>,
    completed: SkipSet<PeerId>,
    optimistic: AtomicU32,
    // pieces received from each neighbor since the last choke cycle.
    rates: SkipMap<PeerId, AtomicU32>,
    sessions: SkipMap<PeerId, Arc<SessionHandle>>,

    shutdown: CancellationToken,
}

impl SwarmState {
    const NO_PEER: u32 = u32::MAX;

    pub fn new(
        local_id: PeerId,
        swarm_size: usize,
        layout: PieceLayout,
        starts_complete: bool,
        shutdown: CancellationToken,
    ) -> Self {
        let completed = SkipSet::new();
        if starts_complete {
            completed.insert(local_id);
        }

        Self {
            local_id,
            swarm_size,
            layout,
            bitfield: LocalBitfield::new(layout.n_pieces(), starts_complete),
            local_complete: AtomicBool::new(starts_complete),
            interested: SkipSet::new(),
            unchoked: SkipSet::new(),
            completed,
            optimistic: AtomicU32::new(Self::NO_PEER),
            rates: SkipMap::new(),
            sessions: SkipMap::new(),
            shutdown,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn swarm_size(&self) -> usize {
        self.swarm_size
    }

    pub fn layout(&self) -> &PieceLayout {
        &self.layout
    }

    pub fn bitfield(&self) -> &LocalBitfield {
        &self.bitfield
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn add_interested(&self, peer_id: PeerId) {
        self.interested.insert(peer_id);
    }

    pub fn remove_interested(&self, peer_id: PeerId) -> bool {
        self.interested.remove(&peer_id).is_some()
    }

    pub fn is_interested(&self, peer_id: PeerId) -> bool {
        self.interested.contains(&peer_id)
    }

    pub fn interested_peers(&self) -> Vec<PeerId> {
        self.interested.iter().map(|entry| *entry.value()).collect()
    }

    pub fn mark_unchoked(&self, peer_id: PeerId) {
        self.unchoked.insert(peer_id);
    }

    pub fn unmark_unchoked(&self, peer_id: PeerId) {
        self.unchoked.remove(&peer_id);
    }

    pub fn unchoked_peers(&self) -> Vec<PeerId> {
        self.unchoked.iter().map(|entry| *entry.value()).collect()
    }

    /// returns true the first time a peer is marked. each neighbor is only ever marked by
    /// its own session, the local peer through [`Self::complete_local`].
    pub fn mark_completed(&self, peer_id: PeerId) -> bool {
        if self.completed.contains(&peer_id) {
            return false;
        }
        self.completed.insert(peer_id);
        true
    }

    pub fn is_completed(&self, peer_id: PeerId) -> bool {
        self.completed.contains(&peer_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// true for exactly one caller once the local bitfield is full.
    pub fn complete_local(&self) -> bool {
        if !self.bitfield.is_complete() || self.local_complete.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.completed.insert(self.local_id);
        true
    }

    pub fn is_local_complete(&self) -> bool {
        self.local_complete.load(Ordering::Acquire)
    }

    pub fn swarm_complete(&self) -> bool {
        self.completed_count() >= self.swarm_size
    }

    pub fn optimistic(&self) -> Option<PeerId> {
        match self.optimistic.load(Ordering::Acquire) {
            Self::NO_PEER => None,
            id => PeerId::new(id).ok(),
        }
    }

    pub fn set_optimistic(&self, peer_id: PeerId) {
        self.optimistic
            .store(peer_id.get() as u32, Ordering::Release);
    }

    /// clears the optimistic slot only if it still holds `peer_id`.
    pub fn clear_optimistic_if(&self, peer_id: PeerId) -> bool {
        self.optimistic
            .compare_exchange(
                peer_id.get() as u32,
                Self::NO_PEER,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn record_piece(&self, peer_id: PeerId) {
        if let Some(entry) = self.rates.get(&peer_id) {
            entry.value().fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn rate(&self, peer_id: PeerId) -> Option<u32> {
        self.rates
            .get(&peer_id)
            .map(|entry| entry.value().load(Ordering::Relaxed))
    }

    /// neighbors ordered by pieces received this interval, fastest first.
    pub fn ranked_by_rate(&self) -> Vec<(PeerId, u32)> {
        let mut ranking: Vec<_> = self
            .rates
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        ranking.sort_by(|(_, a), (_, b)| b.cmp(a));
        ranking
    }

    pub fn reset_rates(&self) {
        for entry in self.rates.iter() {
            entry.value().store(0, Ordering::Relaxed);
        }
    }

    pub fn register(&self, handle: Arc<SessionHandle>) -> Result<(), ProtocolError> {
        let peer_id = handle.peer_id();
        if peer_id == self.local_id || self.sessions.contains_key(&peer_id) {
            return Err(ProtocolError::DuplicateSession(peer_id));
        }

        self.rates.insert(peer_id, AtomicU32::new(0));
        self.sessions.insert(peer_id, handle);
        Ok(())
    }

    /// forget a closed session. the neighbor stays in the completed set.
    pub fn deregister(&self, peer_id: PeerId) {
        self.sessions.remove(&peer_id);
        self.rates.remove(&peer_id);
        self.interested.remove(&peer_id);
        self.unchoked.remove(&peer_id);
        self.clear_optimistic_if(peer_id);
    }

    pub fn session(&self, peer_id: PeerId) -> Option<Arc<SessionHandle>> {
        self.sessions
            .get(&peer_id)
            .map(|entry| entry.value().clone())
    }

    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
