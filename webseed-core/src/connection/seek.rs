//! Seek detection for sequential piece consumers.
//!
//! Consumers normally ask for pieces in ascending order. A request that is not
//! the successor of the previously queued piece means the reader jumped; the
//! running download is then finished up to the last piece the reader was
//! waiting on and restarted at the new position.

use crate::layout::PieceIndex;

/// Tracks request continuity and the pending restart point.
#[derive(Debug, Default, Clone)]
pub struct SeekDetector {
    last_queued: Option<PieceIndex>,
    break_index: Option<PieceIndex>,
    restart_index: PieceIndex,
}

impl SeekDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a discontinuity if `index` does not follow the last queued piece.
    ///
    /// Only applies while a download is running and no restart is pending.
    /// Returns true when a new break point was recorded.
    pub fn observe(&mut self, index: PieceIndex, download_active: bool) -> bool {
        if !download_active || self.break_index.is_some() {
            return false;
        }
        let Some(last) = self.last_queued else {
            return false;
        };
        if last.successor() == Some(index) {
            return false;
        }

        self.break_index = Some(last);
        self.restart_index = index;
        true
    }

    /// Remembers the most recently queued piece.
    pub fn record_queued(&mut self, index: PieceIndex) {
        self.last_queued = Some(index);
    }

    /// Clears the break point if `served` is the piece it waits for.
    ///
    /// Returns true when the running download must now restart.
    pub fn take_break(&mut self, served: PieceIndex) -> bool {
        if self.break_index == Some(served) {
            self.break_index = None;
            true
        } else {
            false
        }
    }

    /// Drops any pending break point, e.g. when the download restarted anyway.
    pub fn clear_break(&mut self) {
        self.break_index = None;
    }

    pub fn last_queued(&self) -> Option<PieceIndex> {
        self.last_queued
    }

    pub fn break_index(&self) -> Option<PieceIndex> {
        self.break_index
    }

    /// Piece index sequential scanning resumes from.
    pub fn restart_index(&self) -> PieceIndex {
        self.restart_index
    }
}
