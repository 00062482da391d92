mod bitfield;
mod layout;
mod peer_id;
mod state;

pub use bitfield::{Bitfield, LocalBitfield, PieceState};
pub use layout::PieceLayout;
pub use peer_id::{PeerId, PeerIdError};
pub use state::SwarmState;

pub type PieceIndex = usize;

/// `[1001,1002]` style rendering used in log lines.
pub fn format_ids(ids: &[PeerId]) -> String {
    let joined = ids
        .iter()
        .map(PeerId::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}
