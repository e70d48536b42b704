//! Piece cache abstraction consulted before any network activity
//!
//! The cache is owned outside the connection (typically by the torrent's piece
//! store). The connection only reads from it; deciding what to store is the
//! owner's business.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::layout::PieceIndex;

/// Read-only view of pieces that are already available locally.
pub trait PieceCache: Send + Sync {
    /// Returns the cached piece bytes, if present.
    fn get(&self, index: PieceIndex) -> Option<Bytes>;

    /// Checks if a piece is cached without cloning its data.
    fn contains(&self, index: PieceIndex) -> bool {
        self.get(index).is_some()
    }
}

/// In-memory piece cache shared between a connection and its owner.
#[derive(Debug, Default)]
pub struct MemoryPieceCache {
    pieces: RwLock<HashMap<PieceIndex, Bytes>>,
}

impl MemoryPieceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a piece, replacing any previous bytes for the same index.
    pub fn insert(&self, index: PieceIndex, data: Bytes) {
        self.pieces.write().insert(index, data);
    }

    pub fn remove(&self, index: PieceIndex) -> Option<Bytes> {
        self.pieces.write().remove(&index)
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.read().is_empty()
    }
}

impl PieceCache for MemoryPieceCache {
    fn get(&self, index: PieceIndex) -> Option<Bytes> {
        self.pieces.read().get(&index).cloned()
    }

    fn contains(&self, index: PieceIndex) -> bool {
        self.pieces.read().contains_key(&index)
    }
}
