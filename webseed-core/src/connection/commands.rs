//! Command definitions for the web seed connection actor.

use tokio::sync::oneshot;

use super::queue::PieceResponder;
use super::session::SessionState;
use crate::layout::PieceIndex;

/// Commands that can be sent to a connection actor.
///
/// Each command carries a response channel. The actor handles commands one at
/// a time, interleaved with events from its running download.
#[derive(Debug)]
pub enum WebSeedCommand {
    /// Request the bytes of one piece.
    RequestPiece {
        index: PieceIndex,
        responder: PieceResponder,
    },
    /// Snapshot the connection counters.
    GetStats {
        responder: oneshot::Sender<ConnectionStats>,
    },
    /// Cancel every fetch and stop the actor.
    Destroy { responder: oneshot::Sender<()> },
}

/// Counters describing one connection's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Distinct pieces waiting for streamed bytes
    pub pending_pieces: usize,
    /// Bytes of the resource held in the buffer
    pub loaded_bytes: u64,
    /// Sequential range fetches opened
    pub sessions_started: u64,
    /// Range fetches cancelled because of a seek
    pub sessions_aborted: u64,
    /// Bytes received by sequential fetches
    pub bytes_fetched: u64,
    /// Standalone fetches for the final piece
    pub last_piece_fetches: u64,
    /// Sequential fetches that ended with a transport error
    pub transport_errors: u64,
    /// Highest piece answered from the external cache
    pub highest_cache_served: Option<PieceIndex>,
    pub state: SessionState,
    pub destroyed: bool,
}

impl ConnectionStats {
    /// Checks if a sequential fetch is currently streaming.
    pub fn is_downloading(&self) -> bool {
        matches!(self.state, SessionState::Fetching | SessionState::Draining)
    }
}
