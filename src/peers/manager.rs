use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::{wrappers::TcpListenerStream, StreamExt};

use super::{PeerConnector, Result, Session, SessionContext};
use crate::config::{Membership, PeerInfo};
use crate::prelude::*;
use crate::swarm::PeerId;

/// opens every session of the local peer: dials the peers listed before it and accepts
/// the ones listed after it.
#[derive(Clone)]
pub struct ConnectionManager {
    membership: Arc<Membership>,
    ctx: SessionContext,
}

impl ConnectionManager {
    pub fn new(membership: Arc<Membership>, ctx: SessionContext) -> Self {
        Self { membership, ctx }
    }

    fn local_id(&self) -> PeerId {
        self.ctx.swarm.local_id()
    }

    /// failing to bind is fatal for the whole process.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let port = self.membership.local().port;
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening for later peers");
        Ok(listener)
    }

    #[instrument(name = "client role", level = "info", skip_all, fields(local = %self.local_id()))]
    pub async fn dial_earlier_peers(&self) {
        for peer in self.membership.earlier_peers() {
            if self.ctx.swarm.shutdown_token().is_cancelled() {
                break;
            }

            match self.dial(peer).await {
                Ok(()) => info!(peer = %peer.id, "made a connection to peer"),
                Err(err) => warn!(peer = %peer.id, %err, "could not connect to peer"),
            }
        }
        debug!("done dialing");
    }

    async fn dial(&self, peer: &PeerInfo) -> Result<()> {
        let connection = PeerConnector::connect(&peer.host, peer.port)
            .await?
            .handshake(self.local_id(), peer.id)
            .await?;
        Session::spawn(connection, self.ctx.clone())?;
        Ok(())
    }

    /// handshakes that fail are dropped and do not count toward the later peers.
    #[instrument(name = "server role", level = "info", skip_all, fields(local = %self.local_id()))]
    pub async fn accept_later_peers(&self, listener: TcpListener) {
        let expected = self.membership.later_peers().len();
        let shutdown = self.ctx.swarm.shutdown_token().clone();
        let mut incoming = TcpListenerStream::new(listener);
        let mut established = 0;

        while established < expected {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = incoming.next() => match next {
                    Some(Ok(stream)) => stream,
                    Some(Err(err)) => {
                        warn!(%err, "failed to accept connection");
                        continue;
                    }
                    None => break,
                },
            };

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.accept(stream) => result,
            };
            match result {
                Ok(peer_id) => {
                    established += 1;
                    info!(peer = %peer_id, established, expected, "peer is connected");
                }
                Err(err) => warn!(%err, "dropping inbound connection"),
            }
        }
        debug!(established, "done accepting");
    }

    async fn accept(&self, stream: TcpStream) -> Result<PeerId> {
        let peer_addr = stream.peer_addr()?;
        let connection = PeerConnector::accepted(stream, peer_addr)?
            .accept_handshake(self.local_id(), &self.membership)
            .await?;
        let peer_id = connection.peer_id;
        Session::spawn(connection, self.ctx.clone())?;
        Ok(peer_id)
    }
}
