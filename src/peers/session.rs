use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use rand::seq::SliceRandom;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{PeerConnection, PeerStream, Result, SessionError, SessionHandle};
use crate::peer_protocol::codec::{upgrade_stream, PeerFrames};
use crate::peer_protocol::{PeerMessage, ProtocolError};
use crate::prelude::*;
use crate::storage::PieceStore;
use crate::swarm::{Bitfield, PeerId, PieceIndex, SwarmState};

/// what every session needs from the rest of the process.
#[derive(Clone)]
pub struct SessionContext {
    pub swarm: Arc<SwarmState>,
    pub store: Arc<dyn PieceStore>,
}

// what we know about the neighbor. the "we unchoke them" flag lives on the handle.
#[derive(Debug, Default)]
struct NeighborState {
    remote: Option<Bitfield>,
    // last interest we sent, None until the first one goes out.
    am_interested: Option<bool>,
    choked_by_peer: bool,
    completed: bool,
}

/// the receiving half of an active connection with one neighbor.
pub struct Session<S: PeerStream> {
    handle: Arc<SessionHandle>,
    frames_rx: SplitStream<PeerFrames<S>>,
    ctx: SessionContext,
    neighbor: NeighborState,
}

impl<S: PeerStream> Session<S> {
    /// registers the neighbor, queues our bitfield and starts the reader and writer tasks.
    /// the returned task finishes once the session is closed and deregistered.
    pub fn spawn(connection: PeerConnection<S>, ctx: SessionContext) -> Result<JoinHandle<()>> {
        let PeerConnection {
            peer_addr,
            peer_id,
            stream,
        } = connection;

        let (frames_tx, frames_rx) = upgrade_stream(stream, ctx.swarm.layout()).split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle::new(peer_id, outbound_tx));

        ctx.swarm.register(handle.clone())?;
        // taken after registering so no HAVE broadcast can fall in between.
        handle.send(PeerMessage::Bitfield(ctx.swarm.bitfield().snapshot()))?;

        let span = info_span!("session", peer = %peer_id, %peer_addr);
        tokio::spawn(Self::write_loop(frames_tx, outbound_rx).instrument(span.clone()));

        let session = Self {
            handle,
            frames_rx,
            ctx,
            neighbor: NeighborState {
                choked_by_peer: true,
                ..Default::default()
            },
        };
        info!(peer = %peer_id, "session established");
        Ok(tokio::spawn(session.run().instrument(span)))
    }

    async fn write_loop(
        mut frames_tx: SplitSink<PeerFrames<S>, PeerMessage>,
        mut outbound_rx: mpsc::UnboundedReceiver<PeerMessage>,
    ) {
        // ends once every handle is dropped, after flushing what was queued.
        while let Some(msg) = outbound_rx.recv().await {
            trace!(tag = msg.tag(), "writing message");
            if let Err(err) = frames_tx.send(msg).await {
                warn!(%err, "failed to write to peer");
                break;
            }
        }
        debug!("writer finished");
    }

    async fn run(mut self) {
        let shutdown = self.ctx.swarm.shutdown_token().clone();
        let result = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            result = self.receive_loop() => result,
        };

        match result {
            Ok(()) => info!("session closed"),
            Err(SessionError::Closed) => info!("peer closed the connection"),
            Err(err) => warn!(%err, "session ended"),
        }
        self.ctx.swarm.deregister(self.peer_id());
    }

    async fn receive_loop(&mut self) -> Result<()> {
        loop {
            let msg = match self.frames_rx.next().await {
                Some(msg) => msg?,
                None => return Err(SessionError::Closed),
            };
            trace!(tag = msg.tag(), "received message");

            if self.handle_message(msg)?.is_break() {
                return Ok(());
            }
        }
    }

    fn peer_id(&self) -> PeerId {
        self.handle.peer_id()
    }

    fn handle_message(&mut self, msg: PeerMessage) -> Result<ControlFlow<()>> {
        type PM = PeerMessage;
        let peer_id = self.peer_id();

        match msg {
            PM::Bitfield(bits) => self.on_bitfield(bits)?,
            PM::Interested => {
                info!("received the 'interested' message");
                self.ctx.swarm.add_interested(peer_id);
            }
            PM::NotInterested => {
                info!("received the 'not interested' message");
                self.ctx.swarm.remove_interested(peer_id);
                self.ctx.swarm.clear_optimistic_if(peer_id);
                self.handle.choke(&self.ctx.swarm)?;
            }
            PM::Choke => {
                info!("choked by peer");
                self.neighbor.choked_by_peer = true;
            }
            PM::Unchoke => {
                info!("unchoked by peer");
                self.neighbor.choked_by_peer = false;
                self.request_piece()?;
            }
            PM::Request(index) => self.on_request(index)?,
            PM::Piece { index, piece } => self.on_piece(index, piece)?,
            PM::Have(index) => self.on_have(index)?,
            PM::Complete => {
                info!("received complete, the whole swarm has the file");
                self.ctx.swarm.request_shutdown();
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn on_bitfield(&mut self, bits: Bitfield) -> Result<()> {
        let expected = self.ctx.swarm.layout().n_pieces();
        if bits.len() != expected {
            return Err(ProtocolError::BitfieldLength {
                got: bits.len(),
                expected,
            }
            .into());
        }

        info!(pieces = bits.count_ones(), "received bitfield");
        self.neighbor.remote = Some(bits);
        self.check_remote_complete()?;
        self.send_interest(true)
    }

    fn on_have(&mut self, index: u32) -> Result<()> {
        let piece_index = self.check_index(index)?;
        info!(index, "received the 'have' message");

        let n_pieces = self.ctx.swarm.layout().n_pieces();
        self.neighbor
            .remote
            .get_or_insert_with(|| Bitfield::repeat(false, n_pieces))
            .set(piece_index, true);

        if !self.ctx.swarm.bitfield().has(piece_index) {
            debug!(index, "requesting advertised piece");
            self.handle.send(PeerMessage::Request(index))?;
        }

        self.check_remote_complete()?;
        self.send_interest(false)
    }

    fn on_request(&mut self, index: u32) -> Result<()> {
        let swarm = &self.ctx.swarm;
        let peer_id = self.peer_id();
        swarm.add_interested(peer_id);

        let permitted = self.handle.is_unchoked() || swarm.optimistic() == Some(peer_id);
        if !permitted {
            debug!(index, "dropping request from a choked peer");
            return Ok(());
        }

        let piece_index = index as PieceIndex;
        if !swarm.bitfield().has(piece_index) {
            debug!(index, "dropping request for a piece we do not have");
            return Ok(());
        }

        let piece = self.ctx.store.read_piece(piece_index)?;
        debug!(index, "sending piece");
        self.handle.send(PeerMessage::Piece { index, piece })
    }

    fn on_piece(&mut self, index: u32, piece: Vec<u8>) -> Result<()> {
        let expected = self.piece_len(index)?;
        if piece.len() != expected {
            return Err(ProtocolError::PieceLength {
                index,
                got: piece.len(),
                expected,
            }
            .into());
        }

        let swarm = &self.ctx.swarm;
        let peer_id = self.peer_id();
        let piece_index = index as PieceIndex;
        swarm.record_piece(peer_id);

        let bitfield = swarm.bitfield();
        if !bitfield.try_claim(piece_index) {
            debug!(index, "discarding duplicate piece");
            return Ok(());
        }
        if let Err(err) = self.ctx.store.write_piece(piece_index, &piece) {
            bitfield.release(piece_index);
            return Err(err.into());
        }
        bitfield.commit(piece_index);
        info!(index, have = bitfield.count_have(), "downloaded piece");

        let completed_now = swarm.complete_local();
        // the sender too, it only learns we are complete from our HAVEs.
        for session in swarm.sessions() {
            if let Err(err) = session.send(PeerMessage::Have(index)) {
                debug!(peer = %session.peer_id(), %err, "could not queue have");
            }
        }

        if completed_now {
            self.ctx.store.assemble_file()?;
            info!("downloaded the complete file");
        } else if !bitfield.is_complete() {
            self.request_piece()?;
        }
        Ok(())
    }

    // on a full remote bitfield, the neighbor is counted once and stops being served.
    fn check_remote_complete(&mut self) -> Result<()> {
        let remote_full = self.neighbor.remote.as_ref().is_some_and(|bits| bits.all());
        if !remote_full || self.neighbor.completed {
            return Ok(());
        }
        self.neighbor.completed = true;

        let swarm = &self.ctx.swarm;
        let peer_id = self.peer_id();
        if !swarm.mark_completed(peer_id) {
            return Ok(());
        }

        info!("peer has the complete file");
        swarm.remove_interested(peer_id);
        swarm.clear_optimistic_if(peer_id);
        if self.handle.is_unchoked() {
            self.handle.choke(swarm)?;
        }
        Ok(())
    }

    fn request_piece(&mut self) -> Result<()> {
        let candidate = self
            .wanted_pieces()
            .choose(&mut rand::thread_rng())
            .copied();

        match candidate {
            Some(index) => {
                debug!(index, "requesting piece");
                self.handle.send(PeerMessage::Request(index as u32))
            }
            None => self.send_interest(true),
        }
    }

    fn send_interest(&mut self, force: bool) -> Result<()> {
        let interested = self.is_interesting();
        if !force && self.neighbor.am_interested == Some(interested) {
            return Ok(());
        }
        self.neighbor.am_interested = Some(interested);

        debug!(interested, "sending interest");
        self.handle.send(if interested {
            PeerMessage::Interested
        } else {
            PeerMessage::NotInterested
        })
    }

    // pieces the neighbor has that nobody is fetching for us yet.
    fn wanted_pieces(&self) -> Vec<PieceIndex> {
        let Some(remote) = &self.neighbor.remote else {
            return Vec::new();
        };
        let local = self.ctx.swarm.bitfield();
        remote.iter_ones().filter(|&i| local.is_missing(i)).collect()
    }

    fn is_interesting(&self) -> bool {
        let local = self.ctx.swarm.bitfield();
        self.neighbor
            .remote
            .as_ref()
            .is_some_and(|remote| remote.iter_ones().any(|i| !local.has(i)))
    }

    fn piece_len(&self, index: u32) -> std::result::Result<usize, ProtocolError> {
        let layout = self.ctx.swarm.layout();
        layout
            .piece_len(index as PieceIndex)
            .ok_or(ProtocolError::IndexOutOfRange {
                index,
                n_pieces: layout.n_pieces(),
            })
    }

    fn check_index(&self, index: u32) -> std::result::Result<PieceIndex, ProtocolError> {
        self.piece_len(index).map(|_| index as PieceIndex)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peers::UnchokeKind;
    use crate::storage::memory::MemoryPieceStore;
    use crate::swarm::{PieceLayout, PieceState};
    use rstest::rstest;
    use std::collections::BTreeSet;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    const CONTENTS: &[u8] = b"0123456789";
    const WAIT: Duration = Duration::from_secs(5);

    fn id(id: u32) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn layout() -> PieceLayout {
        // pieces of 4, 4 and 2 bytes.
        PieceLayout::new(CONTENTS.len() as u64, 4).unwrap()
    }

    fn piece(index: usize) -> Vec<u8> {
        CONTENTS.chunks(4).nth(index).unwrap().to_vec()
    }

    fn bits(values: &[bool]) -> Bitfield {
        values.iter().copied().collect()
    }

    struct Harness {
        swarm: Arc<SwarmState>,
        store: Arc<MemoryPieceStore>,
        remote: PeerFrames<DuplexStream>,
        session: JoinHandle<()>,
    }

    impl Harness {
        // session of local peer 1001 with neighbor 1002, the test drives 1002's side.
        fn start(local_complete: bool) -> Self {
            let store = if local_complete {
                MemoryPieceStore::with_pieces((0..3).map(|i| (i, piece(i))))
            } else {
                MemoryPieceStore::default()
            };
            Self::with_store(local_complete, store)
        }

        fn with_store(local_complete: bool, store: MemoryPieceStore) -> Self {
            let swarm = Arc::new(SwarmState::new(
                id(1001),
                2,
                layout(),
                local_complete,
                CancellationToken::new(),
            ));
            let store = Arc::new(store);
            let (local, remote) = tokio::io::duplex(1024);

            let connection = PeerConnection {
                peer_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6002)),
                peer_id: id(1002),
                stream: local,
            };
            let ctx = SessionContext {
                swarm: swarm.clone(),
                store: store.clone(),
            };
            let session = Session::spawn(connection, ctx).unwrap();

            Self {
                swarm,
                store,
                remote: upgrade_stream(remote, &layout()),
                session,
            }
        }

        async fn recv(&mut self) -> PeerMessage {
            timeout(WAIT, self.remote.next())
                .await
                .expect("timed out waiting for a message")
                .expect("session closed the stream")
                .expect("session sent a malformed frame")
        }

        async fn send(&mut self, msg: PeerMessage) {
            self.remote.send(msg).await.unwrap();
        }

        async fn closed(self) -> Arc<SwarmState> {
            timeout(WAIT, self.session)
                .await
                .expect("session did not close")
                .unwrap();
            self.swarm
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_seed_serves_only_when_unchoked() {
        let mut peer = Harness::start(true);
        assert_eq!(peer.recv().await, PeerMessage::Bitfield(bits(&[true; 3])));

        peer.send(PeerMessage::Bitfield(bits(&[false; 3]))).await;
        assert_eq!(peer.recv().await, PeerMessage::NotInterested);

        // choked: the request is dropped, the choke answering NOT_INTERESTED comes first.
        peer.send(PeerMessage::Request(0)).await;
        peer.send(PeerMessage::NotInterested).await;
        assert_eq!(peer.recv().await, PeerMessage::Choke);

        peer.send(PeerMessage::Interested).await;
        let swarm = peer.swarm.clone();
        eventually(|| swarm.is_interested(id(1002))).await;

        let handle = swarm.session(id(1002)).unwrap();
        handle.unchoke(&swarm, UnchokeKind::Preferred).unwrap();
        assert_eq!(peer.recv().await, PeerMessage::Unchoke);

        peer.send(PeerMessage::Request(2)).await;
        assert_eq!(
            peer.recv().await,
            PeerMessage::Piece {
                index: 2,
                piece: b"89".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_optimistic_peer_is_served() {
        let mut peer = Harness::start(true);
        peer.recv().await;

        peer.swarm.set_optimistic(id(1002));
        peer.send(PeerMessage::Request(1)).await;
        assert_eq!(
            peer.recv().await,
            PeerMessage::Piece {
                index: 1,
                piece: piece(1)
            }
        );
    }

    #[tokio::test]
    async fn test_leecher_downloads_every_piece() {
        let mut peer = Harness::start(false);
        assert_eq!(peer.recv().await, PeerMessage::Bitfield(bits(&[false; 3])));

        peer.send(PeerMessage::Bitfield(bits(&[true; 3]))).await;
        assert_eq!(peer.recv().await, PeerMessage::Interested);
        assert!(peer.swarm.is_completed(id(1002)));

        peer.send(PeerMessage::Unchoke).await;
        let mut requested = BTreeSet::new();
        for _ in 0..3 {
            let PeerMessage::Request(index) = peer.recv().await else {
                panic!("expected a request");
            };
            assert!(requested.insert(index), "piece {index} requested twice");
            peer.send(PeerMessage::Piece {
                index,
                piece: piece(index as usize),
            })
            .await;
            assert_eq!(peer.recv().await, PeerMessage::Have(index));
        }

        let store = peer.store.clone();
        eventually(|| store.is_assembled()).await;
        assert_eq!(requested, BTreeSet::from([0, 1, 2]));
        assert!(peer.swarm.is_local_complete());
        assert!(peer.swarm.swarm_complete());
        assert_eq!(peer.store.piece(2), Some(b"89".to_vec()));
        assert_eq!(peer.swarm.rate(id(1002)), Some(3));
    }

    #[tokio::test]
    async fn test_have_requests_missing_piece_right_away() {
        let mut peer = Harness::start(false);
        peer.recv().await;

        peer.send(PeerMessage::Bitfield(bits(&[false; 3]))).await;
        assert_eq!(peer.recv().await, PeerMessage::NotInterested);

        peer.send(PeerMessage::Have(1)).await;
        assert_eq!(peer.recv().await, PeerMessage::Request(1));
        assert_eq!(peer.recv().await, PeerMessage::Interested);

        // interest is unchanged, nothing but the fast path request goes out.
        peer.send(PeerMessage::Have(0)).await;
        assert_eq!(peer.recv().await, PeerMessage::Request(0));
        peer.send(PeerMessage::NotInterested).await;
        assert_eq!(peer.recv().await, PeerMessage::Choke);
    }

    #[tokio::test]
    async fn test_have_completing_remote_marks_it_once() {
        let mut peer = Harness::start(false);
        peer.recv().await;
        peer.send(PeerMessage::Bitfield(bits(&[true, true, false]))).await;
        assert_eq!(peer.recv().await, PeerMessage::Interested);
        assert!(!peer.swarm.is_completed(id(1002)));

        peer.send(PeerMessage::Interested).await;
        peer.send(PeerMessage::Have(2)).await;
        assert_eq!(peer.recv().await, PeerMessage::Request(2));

        let swarm = peer.swarm.clone();
        eventually(|| swarm.is_completed(id(1002))).await;
        assert!(!swarm.is_interested(id(1002)));
        assert_eq!(swarm.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_piece_is_written_once() {
        let mut peer = Harness::start(false);
        peer.recv().await;

        peer.send(PeerMessage::Piece {
            index: 0,
            piece: piece(0),
        })
        .await;
        peer.send(PeerMessage::Piece {
            index: 0,
            piece: piece(0),
        })
        .await;
        assert_eq!(peer.recv().await, PeerMessage::Have(0));
        // nothing to request from a peer with no bitfield, interest is sent instead.
        assert_eq!(peer.recv().await, PeerMessage::NotInterested);

        peer.send(PeerMessage::NotInterested).await;
        assert_eq!(peer.recv().await, PeerMessage::Choke);

        assert_eq!(peer.store.writes(), 1);
        assert_eq!(peer.swarm.bitfield().state(0), Some(PieceState::Have));
        assert_eq!(peer.swarm.rate(id(1002)), Some(2));
    }

    #[tokio::test]
    async fn test_have_goes_to_every_session_after_the_write() {
        let mut peer = Harness::start(false);
        peer.recv().await;

        let (other_tx, mut other_rx) = tokio::sync::mpsc::unbounded_channel();
        peer.swarm
            .register(Arc::new(SessionHandle::new(id(1003), other_tx)))
            .unwrap();
        assert!(other_rx.try_recv().is_err());

        peer.send(PeerMessage::Piece {
            index: 1,
            piece: piece(1),
        })
        .await;
        assert_eq!(peer.recv().await, PeerMessage::Have(1));
        assert_eq!(peer.store.writes(), 1);
        assert_eq!(peer.store.piece(1), Some(piece(1)));

        let msg = timeout(WAIT, other_rx.recv()).await.unwrap();
        assert_eq!(msg, Some(PeerMessage::Have(1)));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_storage_failure_ends_session_and_releases_claim() {
        let store = MemoryPieceStore::default();
        store.fail_writes();
        let mut peer = Harness::with_store(false, store);
        peer.recv().await;

        peer.send(PeerMessage::Piece {
            index: 1,
            piece: piece(1),
        })
        .await;

        let swarm = peer.closed().await;
        assert_eq!(swarm.bitfield().state(1), Some(PieceState::Missing));
        assert!(swarm.session(id(1002)).is_none());
        assert!(!swarm.shutdown_token().is_cancelled());
    }

    #[rstest]
    #[case::have_out_of_range(PeerMessage::Have(3))]
    #[case::short_bitfield(PeerMessage::Bitfield(bits(&[true, false])))]
    #[case::short_piece(PeerMessage::Piece { index: 0, piece: vec![1, 2] })]
    #[case::piece_out_of_range(PeerMessage::Piece { index: 9, piece: vec![1, 2] })]
    #[tokio::test]
    async fn test_protocol_error_closes_session(#[case] msg: PeerMessage) {
        let mut peer = Harness::start(false);
        peer.recv().await;
        peer.swarm.add_interested(id(1002));

        peer.send(msg).await;
        let swarm = peer.closed().await;
        assert!(swarm.session(id(1002)).is_none());
        assert!(!swarm.is_interested(id(1002)));
    }

    #[tokio::test]
    async fn test_complete_requests_shutdown() {
        let mut peer = Harness::start(true);
        peer.recv().await;

        peer.send(PeerMessage::Complete).await;
        let swarm = peer.closed().await;
        assert!(swarm.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_eof_deregisters() {
        let mut peer = Harness::start(true);
        peer.recv().await;
        let Harness {
            swarm,
            remote,
            session,
            ..
        } = peer;
        swarm.mark_completed(id(1002));
        drop(remote);

        timeout(WAIT, session).await.unwrap().unwrap();
        assert!(swarm.session(id(1002)).is_none());
        assert!(swarm.is_completed(id(1002)));
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let mut peer = Harness::start(true);
        peer.recv().await;

        peer.swarm.request_shutdown();
        let swarm = peer.closed().await;
        assert!(swarm.session(id(1002)).is_none());
    }

    #[tokio::test]
    async fn test_second_session_for_same_peer_is_rejected() {
        let peer = Harness::start(true);
        let (local, _remote) = tokio::io::duplex(64);
        let connection = PeerConnection {
            peer_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 6002)),
            peer_id: id(1002),
            stream: local,
        };
        let ctx = SessionContext {
            swarm: peer.swarm.clone(),
            store: peer.store.clone(),
        };

        assert!(matches!(
            Session::spawn(connection, ctx),
            Err(SessionError::Protocol(ProtocolError::DuplicateSession(_)))
        ));
    }
}
