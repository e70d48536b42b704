//! WebSeed Core - BitTorrent pieces backed by a single HTTP range fetch
//!
//! This crate exposes a remote file, reachable only as a sequential byte
//! stream over a range-capable transport, as randomly requestable pieces.
//! One streaming download runs per connection; out-of-order piece requests
//! are parked until the bytes they cover arrive, and seeks restart the
//! download at the new position without discarding what is already buffered.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod connection;
pub mod layout;
pub mod peer;
pub mod tracing_setup;
pub mod transport;

// Re-export main types for convenient access
pub use cache::{MemoryPieceCache, PieceCache};
pub use config::WebSeedConfig;
pub use connection::{ConnectionStats, PendingPiece, WebSeedHandle, spawn_web_seed};
pub use layout::{LayoutError, PieceIndex, ResourceLayout};
pub use peer::WebPeer;
pub use transport::{ByteRange, FetchError, HttpRangeFetcher, MockRangeFetcher, RangeFetcher};

/// Errors surfaced to piece requesters and connection owners.
#[derive(Debug, thiserror::Error)]
pub enum WebSeedError {
    #[error("Piece {index} out of range (piece count {piece_count})")]
    InvalidPieceIndex { index: PieceIndex, piece_count: u32 },

    #[error("Invalid resource layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("Transport error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Last piece fetch failed: {source}")]
    LastPieceFetch { source: FetchError },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl WebSeedError {
    /// Checks if the error came from the remote transport rather than the caller.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            WebSeedError::Fetch(_) | WebSeedError::LastPieceFetch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WebSeedError>;
