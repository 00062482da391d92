use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use super::SessionError;
use crate::peer_protocol::PeerMessage;
use crate::prelude::*;
use crate::swarm::{PeerId, SwarmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchokeKind {
    /// joins the persistent unchoked set.
    Preferred,
    /// temporary, the peer stays out of the unchoked set.
    Optimistic,
}

/// the shareable side of a session: its outbound queue plus the "we unchoke them" flag.
///
/// every message for a neighbor goes through the queue, which is drained by exactly one
/// writer task, so the session itself and both schedulers can send concurrently.
#[derive(Debug)]
pub struct SessionHandle {
    peer_id: PeerId,
    outbound_tx: mpsc::UnboundedSender<PeerMessage>,
    unchoked: AtomicBool,
}

impl SessionHandle {
    pub fn new(peer_id: PeerId, outbound_tx: mpsc::UnboundedSender<PeerMessage>) -> Self {
        Self {
            peer_id,
            outbound_tx,
            unchoked: AtomicBool::new(false),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_unchoked(&self) -> bool {
        self.unchoked.load(Ordering::Acquire)
    }

    pub fn send(&self, msg: PeerMessage) -> Result<(), SessionError> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| SessionError::OutboundClosed)
    }

    /// the choke itself is skipped while the peer holds the optimistic slot, but it always
    /// leaves the persistent unchoked set.
    pub fn choke(&self, swarm: &SwarmState) -> Result<(), SessionError> {
        let result = if swarm.optimistic() != Some(self.peer_id) {
            debug!(peer = %self.peer_id, "sending choke");
            self.send(PeerMessage::Choke)
        } else {
            Ok(())
        };

        if self.unchoked.swap(false, Ordering::AcqRel) {
            swarm.unmark_unchoked(self.peer_id);
        }
        result
    }

    pub fn unchoke(&self, swarm: &SwarmState, kind: UnchokeKind) -> Result<(), SessionError> {
        debug!(peer = %self.peer_id, ?kind, "sending unchoke");
        self.send(PeerMessage::Unchoke)?;

        if kind == UnchokeKind::Preferred {
            self.unchoked.store(true, Ordering::Release);
            swarm.mark_unchoked(self.peer_id);
        }
        Ok(())
    }
}
