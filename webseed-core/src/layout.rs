//! Piece geometry of the served resource
//!
//! Converts between piece indices and byte ranges. Every piece has the same
//! length except the last one, which covers whatever remains of the file.

use std::fmt;
use std::ops::Range;

/// Zero-based index of a piece within the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index immediately following this one.
    pub fn successor(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a resource cannot be split into pieces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Resource is empty")]
    EmptyResource,

    #[error("Piece length must be non-zero")]
    ZeroPieceLength,

    #[error("Resource of {total_length} bytes needs {piece_count} pieces, more than supported")]
    TooManyPieces { total_length: u64, piece_count: u64 },

    #[error("Resource of {total_length} bytes does not fit in memory on this platform")]
    TooLarge { total_length: u64 },
}

/// Static facts about the file being served.
///
/// Immutable for the lifetime of a connection. `last_piece_length` is always
/// in `1..=piece_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLayout {
    total_length: u64,
    piece_length: u32,
    piece_count: u32,
    last_piece_length: u32,
}

impl ResourceLayout {
    /// Splits a resource of `total_length` bytes into `piece_length` pieces.
    ///
    /// # Errors
    ///
    /// - `LayoutError::EmptyResource` - If `total_length` is zero
    /// - `LayoutError::ZeroPieceLength` - If `piece_length` is zero
    /// - `LayoutError::TooManyPieces` - If the piece count does not fit in u32
    /// - `LayoutError::TooLarge` - If the resource cannot be buffered in memory
    pub fn new(total_length: u64, piece_length: u32) -> Result<Self, LayoutError> {
        if total_length == 0 {
            return Err(LayoutError::EmptyResource);
        }
        if piece_length == 0 {
            return Err(LayoutError::ZeroPieceLength);
        }
        if usize::try_from(total_length).is_err() {
            return Err(LayoutError::TooLarge { total_length });
        }

        let piece_count = total_length.div_ceil(piece_length as u64);
        let piece_count = u32::try_from(piece_count).map_err(|_| LayoutError::TooManyPieces {
            total_length,
            piece_count,
        })?;

        let last_piece_offset = (piece_count as u64 - 1) * piece_length as u64;
        let last_piece_length = (total_length - last_piece_offset) as u32;

        Ok(Self {
            total_length,
            piece_length,
            piece_count,
            last_piece_length,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    pub fn last_piece_length(&self) -> u32 {
        self.last_piece_length
    }

    /// Index of the final, possibly undersized, piece.
    pub fn last_piece(&self) -> PieceIndex {
        PieceIndex(self.piece_count - 1)
    }

    /// Check if a piece index is valid for this resource
    pub fn is_valid_piece(&self, index: PieceIndex) -> bool {
        index.0 < self.piece_count
    }

    pub fn is_last_piece(&self, index: PieceIndex) -> bool {
        index == self.last_piece()
    }

    /// Calculate the actual size of a specific piece, zero if out of range
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        if !self.is_valid_piece(index) {
            0
        } else if self.is_last_piece(index) {
            self.last_piece_length
        } else {
            self.piece_length
        }
    }

    /// Byte offset where the piece starts. Not clamped to the resource.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        index.0 as u64 * self.piece_length as u64
    }

    /// Half-open byte range covered by a piece, bounded by the resource end.
    pub fn piece_range(&self, index: PieceIndex) -> Range<u64> {
        let start = self.piece_offset(index).min(self.total_length);
        let end = (start + self.piece_length as u64).min(self.total_length);
        start..end
    }

    /// Byte range of exactly the trailing `last_piece_length` bytes.
    pub fn last_piece_range(&self) -> Range<u64> {
        (self.total_length - self.last_piece_length as u64)..self.total_length
    }
}

impl fmt::Display for ResourceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {} pieces of {} (last {})",
            self.total_length, self.piece_count, self.piece_length, self.last_piece_length
        )
    }
}
