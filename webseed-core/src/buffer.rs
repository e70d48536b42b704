//! Whole-resource byte buffer filled by the streaming download
//!
//! The buffer is allocated once at the full resource size. Download sessions
//! write chunks at their stream offset; the buffer remembers which byte
//! intervals hold real data so pieces are only served once fully loaded.

use std::ops::Range;

use bytes::Bytes;

/// Contiguous store sized to the whole resource.
#[derive(Debug)]
pub struct ByteBuffer {
    data: Vec<u8>,
    /// Sorted, non-overlapping, non-adjacent intervals written so far.
    loaded: Vec<Range<u64>>,
}

impl ByteBuffer {
    /// Allocates a zero-filled buffer of `len` bytes.
    ///
    /// `len` must fit in memory; `ResourceLayout` guarantees that.
    pub fn new(len: u64) -> Self {
        Self {
            data: vec![0; len as usize],
            loaded: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes `chunk` at `offset`, truncating anything past the end.
    ///
    /// Returns the number of bytes actually stored.
    pub fn write_at(&mut self, offset: u64, chunk: &[u8]) -> usize {
        if offset >= self.len() || chunk.is_empty() {
            return 0;
        }

        let start = offset as usize;
        let written = chunk.len().min(self.data.len() - start);
        self.data[start..start + written].copy_from_slice(&chunk[..written]);
        self.mark_loaded(offset..offset + written as u64);
        written
    }

    /// Checks whether every byte of `range` has been written.
    pub fn is_loaded(&self, range: &Range<u64>) -> bool {
        if range.start >= range.end {
            return true;
        }
        // Intervals are merged, so a covering interval must contain the whole range.
        let position = self.loaded.partition_point(|loaded| loaded.end < range.end);
        self.loaded
            .get(position)
            .is_some_and(|loaded| loaded.start <= range.start && loaded.end >= range.end)
    }

    /// Copies `range` out of the buffer.
    pub fn slice(&self, range: Range<u64>) -> Bytes {
        let end = range.end.min(self.len()) as usize;
        let start = (range.start as usize).min(end);
        Bytes::copy_from_slice(&self.data[start..end])
    }

    /// Total number of bytes written at least once.
    pub fn loaded_bytes(&self) -> u64 {
        self.loaded.iter().map(|range| range.end - range.start).sum()
    }

    /// Intervals written so far, in ascending order.
    #[cfg(test)]
    fn loaded_ranges(&self) -> &[Range<u64>] {
        &self.loaded
    }

    fn mark_loaded(&mut self, range: Range<u64>) {
        // Fast path: sequential writes extend the last interval.
        if let Some(last) = self.loaded.last_mut() {
            if last.start <= range.start && range.start <= last.end {
                last.end = last.end.max(range.end);
                return;
            }
        }

        let first = self.loaded.partition_point(|loaded| loaded.end < range.start);
        let last = self.loaded.partition_point(|loaded| loaded.start <= range.end);

        let mut merged = range;
        if first < last {
            merged.start = merged.start.min(self.loaded[first].start);
            merged.end = merged.end.max(self.loaded[last - 1].end);
        }
        self.loaded.splice(first..last, std::iter::once(merged));
    }
}
