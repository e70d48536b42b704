//! Download session state machine and streaming task.
//!
//! A session is one in-flight sequential range fetch. The streaming itself
//! runs in a spawned task that only forwards `SessionEvent`s to the owning
//! connection; all buffer writes and queue drains happen on the owner side.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::buffer::ByteBuffer;
use crate::layout::{PieceIndex, ResourceLayout};
use crate::transport::{ByteRange, FetchError, RangeFetcher};

/// Phase of the connection's download machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No fetch running.
    #[default]
    Idle,
    /// Choosing the next byte range to fetch.
    Scanning,
    /// A range fetch is streaming into the buffer.
    Fetching,
    /// Resolving pending requests after a chunk landed.
    Draining,
    /// Tearing down an obsolete fetch before restarting.
    Aborting,
    /// The connection was destroyed; no further fetches start.
    Ended,
}

/// Messages from a streaming task to its connection.
#[derive(Debug)]
pub enum SessionEvent {
    /// Next chunk of the response body, in stream order.
    Chunk { generation: u64, data: Bytes },
    /// The stream finished, failed, or was cancelled.
    Ended {
        generation: u64,
        outcome: Result<(), FetchError>,
    },
}

/// Progress of the single active range fetch.
#[derive(Debug)]
pub struct DownloadSession {
    generation: u64,
    range: ByteRange,
    loaded_offset: u64,
    cancel: CancellationToken,
}

impl DownloadSession {
    pub fn new(generation: u64, range: ByteRange, cancel: CancellationToken) -> Self {
        Self {
            generation,
            range,
            loaded_offset: range.start,
            cancel,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    /// End of the contiguous bytes streamed so far.
    pub fn loaded_offset(&self) -> u64 {
        self.loaded_offset
    }

    /// Places a chunk at the current offset and advances past it.
    ///
    /// Returns the number of bytes stored in the buffer.
    pub fn write_chunk(&mut self, buffer: &mut ByteBuffer, chunk: &[u8]) -> usize {
        let written = buffer.write_at(self.loaded_offset, chunk);
        self.loaded_offset += chunk.len() as u64;
        written
    }

    /// Bytes received by this session.
    pub fn received(&self) -> u64 {
        self.loaded_offset - self.range.start
    }

    /// Signals the streaming task to stop.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Picks the next byte range to download.
///
/// Scans from `restart_index` for the first piece that is not available, then
/// extends the range up to the next available piece or the resource end. When
/// everything from `restart_index` on is available, the scan wraps to piece 0.
/// Returns `None` once every piece is available.
pub fn plan_range(
    layout: &ResourceLayout,
    restart_index: PieceIndex,
    is_available: impl Fn(PieceIndex) -> bool,
) -> Option<ByteRange> {
    scan_from(layout, restart_index.as_u32(), &is_available).or_else(|| {
        if restart_index.as_u32() > 0 {
            scan_from(layout, 0, &is_available)
        } else {
            None
        }
    })
}

fn scan_from(
    layout: &ResourceLayout,
    from: u32,
    is_available: &impl Fn(PieceIndex) -> bool,
) -> Option<ByteRange> {
    let count = layout.piece_count();
    let scan_start = (from..count)
        .map(PieceIndex::new)
        .find(|&index| !is_available(index))?;
    let scan_end = (scan_start.as_u32() + 1..count)
        .map(PieceIndex::new)
        .find(|&index| is_available(index));

    let range_start = layout.piece_offset(scan_start);
    let range_end = scan_end.map_or(layout.total_length(), |end| {
        layout.piece_offset(end).min(layout.total_length())
    });

    (range_start < range_end).then(|| ByteRange::new(range_start, range_end))
}

/// Streams one range fetch, forwarding chunks to the connection.
///
/// The whole fetch races the session token, so an abort unblocks a pending
/// response or chunk read. Always finishes with a single `SessionEvent::Ended`.
pub async fn stream_range(
    fetcher: Arc<dyn RangeFetcher>,
    url: Url,
    request_range: Option<ByteRange>,
    cancel: CancellationToken,
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(()),
        result = forward_chunks(&*fetcher, &url, request_range, &cancel, generation, &events) => result,
    };

    let _ = events.send(SessionEvent::Ended {
        generation,
        outcome,
    });
}

async fn forward_chunks(
    fetcher: &dyn RangeFetcher,
    url: &Url,
    request_range: Option<ByteRange>,
    cancel: &CancellationToken,
    generation: u64,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Result<(), FetchError> {
    let mut stream = fetcher.fetch(url, request_range, cancel.clone()).await?;

    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        if data.is_empty() {
            continue;
        }
        tracing::trace!("session {} received {} bytes", generation, data.len());
        if events.send(SessionEvent::Chunk { generation, data }).is_err() {
            // Connection is gone
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::transport::MockRangeFetcher;

    fn layout() -> ResourceLayout {
        ResourceLayout::new(1000, 100).unwrap()
    }

    fn available(indices: &[u32]) -> impl Fn(PieceIndex) -> bool {
        let set: HashSet<u32> = indices.iter().copied().collect();
        move |index| set.contains(&index.as_u32())
    }

    #[test]
    fn test_plan_whole_resource_when_nothing_available() {
        let range = plan_range(&layout(), PieceIndex::new(0), available(&[]));
        assert_eq!(range, Some(ByteRange::new(0, 1000)));
    }

    #[test]
    fn test_plan_stops_at_next_available_piece() {
        let range = plan_range(&layout(), PieceIndex::new(0), available(&[0, 1, 5, 6]));
        assert_eq!(range, Some(ByteRange::new(200, 500)));
    }

    #[test]
    fn test_plan_starts_at_restart_index() {
        let range = plan_range(&layout(), PieceIndex::new(7), available(&[]));
        assert_eq!(range, Some(ByteRange::new(700, 1000)));
    }

    #[test]
    fn test_plan_wraps_when_tail_available() {
        let range = plan_range(&layout(), PieceIndex::new(7), available(&[0, 1, 2, 6, 7, 8, 9]));
        assert_eq!(range, Some(ByteRange::new(300, 600)));
    }

    #[test]
    fn test_plan_nothing_when_all_available() {
        let all: Vec<u32> = (0..10).collect();
        assert_eq!(plan_range(&layout(), PieceIndex::new(3), available(&all)), None);
    }

    #[test]
    fn test_plan_clamps_undersized_tail() {
        let layout = ResourceLayout::new(1050, 100).unwrap();
        let range = plan_range(&layout, PieceIndex::new(9), available(&[]));
        assert_eq!(range, Some(ByteRange::new(900, 1050)));
    }

    #[test]
    fn test_session_tracks_offset() {
        let mut buffer = ByteBuffer::new(1000);
        let mut session = DownloadSession::new(1, ByteRange::new(700, 1000), CancellationToken::new());

        assert_eq!(session.loaded_offset(), 700);
        assert_eq!(session.write_chunk(&mut buffer, &[7; 120]), 120);
        assert_eq!(session.loaded_offset(), 820);
        assert_eq!(session.received(), 120);
        assert!(buffer.is_loaded(&(700..800)));
        assert!(!buffer.is_loaded(&(800..900)));
    }

    #[tokio::test]
    async fn test_stream_range_forwards_chunks_then_ends() {
        let fetcher = Arc::new(MockRangeFetcher::new(Bytes::from(vec![3u8; 250]), 100));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let url = Url::parse("http://example.com/a.bin").unwrap();

        stream_range(fetcher, url, None, CancellationToken::new(), 4, events_tx).await;

        let mut sizes = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            match event {
                SessionEvent::Chunk { generation, data } => {
                    assert_eq!(generation, 4);
                    sizes.push(data.len());
                }
                SessionEvent::Ended { generation, outcome } => {
                    assert_eq!(generation, 4);
                    assert!(outcome.is_ok());
                }
            }
        }
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_stream_range_stops_on_cancel() {
        let fetcher = Arc::new(MockRangeFetcher::gated(Bytes::from(vec![1u8; 300]), 100));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let url = Url::parse("http://example.com/a.bin").unwrap();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(stream_range(
            fetcher.clone(),
            url,
            None,
            cancel.clone(),
            1,
            events_tx,
        ));
        fetcher.wait_for_fetches(1).await;
        cancel.cancel();
        fetcher.release(3);
        task.await.unwrap();

        let mut chunks = 0;
        while let Ok(event) = events_rx.try_recv() {
            if let SessionEvent::Chunk { .. } = event {
                chunks += 1;
            }
        }
        assert_eq!(chunks, 0);
    }
}
