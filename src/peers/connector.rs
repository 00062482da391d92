use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{PeerStream, Result};
use crate::config::Membership;
use crate::peer_protocol::{PeerHandshake, ProtocolError};
use crate::prelude::*;
use crate::swarm::PeerId;

pub struct PeerConnector<S: PeerStream> {
    peer_addr: SocketAddr,
    stream: S,
}

/// a stream whose handshake checked out, ready to be turned into a session.
#[derive(Debug)]
pub struct PeerConnection<S: PeerStream> {
    pub peer_addr: SocketAddr,
    pub peer_id: PeerId,
    pub stream: S,
}

impl PeerConnector<TcpStream> {
    #[instrument(name = "connect to peer", level = "info", fields(%host, port), skip_all)]
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        info!("connecting to peer");
        let stream = TcpStream::connect((host, port)).await.inspect_err(|_| {
            error!("failed to connect to peer");
        })?;
        stream.set_nodelay(true)?;

        Ok(Self::from_parts(stream.peer_addr()?, stream))
    }

    pub fn accepted(stream: TcpStream, peer_addr: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self::from_parts(peer_addr, stream))
    }
}

impl<S: PeerStream> PeerConnector<S> {
    pub fn from_parts(peer_addr: SocketAddr, stream: S) -> Self {
        Self { peer_addr, stream }
    }

    /// dialing side: send ours first, then insist the reply comes from the peer we dialed.
    #[instrument(name = "handshake mode", level = "info", skip_all, fields(%expected))]
    pub async fn handshake(self, local_id: PeerId, expected: PeerId) -> Result<PeerConnection<S>> {
        //unwrap self inside function instead of the signature.
        let Self {
            peer_addr,
            mut stream,
        } = self;

        debug!("sending handshake to peer");
        stream
            .write_all(&PeerHandshake::new(local_id).into_bytes())
            .await?;

        debug!("waiting for peer handshake");
        let claimed = Self::read_handshake(&mut stream).await?;
        if claimed != expected {
            warn!(%claimed, "peer handshake came from the wrong peer");
            return Err(ProtocolError::UnexpectedPeer { expected, claimed }.into());
        }

        info!("peer handshake received");
        Ok(PeerConnection {
            stream,
            peer_id: claimed,
            peer_addr,
        })
    }

    /// accepting side: the embedded id has to name another member of the swarm.
    #[instrument(name = "accept handshake", level = "info", skip_all, fields(peer_addr = %self.peer_addr))]
    pub async fn accept_handshake(
        self,
        local_id: PeerId,
        membership: &Membership,
    ) -> Result<PeerConnection<S>> {
        let Self {
            peer_addr,
            mut stream,
        } = self;

        debug!("waiting for peer handshake");
        let claimed = Self::read_handshake(&mut stream).await?;
        if claimed == local_id || membership.get(claimed).is_none() {
            warn!(%claimed, "handshake from a peer outside the swarm");
            return Err(ProtocolError::UnknownPeer(claimed).into());
        }

        debug!(%claimed, "sending handshake to peer");
        stream
            .write_all(&PeerHandshake::new(local_id).into_bytes())
            .await?;

        Ok(PeerConnection {
            stream,
            peer_id: claimed,
            peer_addr,
        })
    }

    async fn read_handshake(stream: &mut S) -> Result<PeerId> {
        let mut bytes = [0; PeerHandshake::LEN];
        stream.read_exact(&mut bytes).await?;

        let handshake = PeerHandshake::from_bytes(bytes)?;
        debug!(peer_handshake_reply = ?handshake);
        Ok(handshake.peer_id()?)
    }
}
