pub mod connector;
pub mod manager;
pub mod session;

mod error;
mod handle;

pub use connector::{PeerConnection, PeerConnector};
pub use error::{Result, SessionError};
pub use handle::{SessionHandle, UnchokeKind};
pub use manager::ConnectionManager;
pub use session::{Session, SessionContext};

use tokio::io::{AsyncRead, AsyncWrite};

pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
