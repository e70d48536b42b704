//! Piece server owning the buffer, pending queue and active download.
//!
//! `PieceServer` is plain state mutated only from the connection actor. The
//! streaming task of the active session reports back through `SessionEvent`s,
//! so every buffer write, queue drain and restart decision happens here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::commands::ConnectionStats;
use super::queue::{Enqueued, PendingQueue, PieceResponder, resolve_all};
use super::seek::SeekDetector;
use super::session::{DownloadSession, SessionEvent, SessionState, plan_range, stream_range};
use crate::WebSeedError;
use crate::buffer::ByteBuffer;
use crate::cache::PieceCache;
use crate::layout::{PieceIndex, ResourceLayout};
use crate::transport::{ByteRange, RangeFetcher, fetch_exact};

/// Serves pieces of one remote resource from a single sequential download.
pub struct PieceServer {
    url: Url,
    layout: ResourceLayout,
    cache: Arc<dyn PieceCache>,
    fetcher: Arc<dyn RangeFetcher>,
    buffer: ByteBuffer,
    queue: PendingQueue,
    seek: SeekDetector,
    session: Option<DownloadSession>,
    state: SessionState,
    next_generation: u64,
    root_token: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
    destroyed: bool,
    stats: ConnectionStats,
}

impl PieceServer {
    /// Creates a server with an empty buffer sized to the whole resource.
    ///
    /// Nothing is fetched until the first piece request.
    pub fn new(
        url: Url,
        layout: ResourceLayout,
        cache: Arc<dyn PieceCache>,
        fetcher: Arc<dyn RangeFetcher>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            url,
            buffer: ByteBuffer::new(layout.total_length()),
            layout,
            cache,
            fetcher,
            queue: PendingQueue::new(),
            seek: SeekDetector::new(),
            session: None,
            state: SessionState::Idle,
            next_generation: 1,
            root_token: CancellationToken::new(),
            events,
            destroyed: false,
            stats: ConnectionStats::default(),
        }
    }

    pub fn layout(&self) -> &ResourceLayout {
        &self.layout
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Answers a piece request now or parks it until the bytes arrive.
    ///
    /// Cached pieces are answered without touching the network. The final
    /// piece of a multi-piece resource gets its own exact range fetch so a
    /// read of the file tail never redirects the sequential download.
    /// Everything else joins the pending queue and may trigger a seek restart.
    pub fn request_piece(&mut self, index: PieceIndex, responder: PieceResponder) {
        if self.destroyed {
            let _ = responder.send(Err(WebSeedError::ConnectionClosed));
            return;
        }

        if !self.layout.is_valid_piece(index) {
            let _ = responder.send(Err(WebSeedError::InvalidPieceIndex {
                index,
                piece_count: self.layout.piece_count(),
            }));
            return;
        }

        if let Some(data) = self.cache.get(index) {
            tracing::trace!("Piece {} served from cache", index);
            self.stats.highest_cache_served = self.stats.highest_cache_served.max(Some(index));
            let _ = responder.send(Ok(data));
            return;
        }

        if index.as_u32() > 0 && self.layout.is_last_piece(index) {
            self.serve_last_piece(responder);
            return;
        }

        // A repeated request is not a new position in the read order
        let seeked =
            !self.queue.contains(index) && self.seek.observe(index, self.session.is_some());
        let previous = self.seek.last_queued();

        match self.queue.insert(index, responder) {
            Enqueued::Joined => {
                // Retries after a failed fetch land here
                self.start_or_continue_download();
                return;
            }
            Enqueued::New => self.seek.record_queued(index),
        }

        if seeked {
            tracing::debug!(
                "Seek from piece {:?} to {} detected, finishing through piece {:?} first",
                previous,
                index,
                self.seek.break_index()
            );
        }

        self.drain();

        // The reader already has everything before the jump
        if let Some(break_index) = self.seek.break_index() {
            if !self.queue.contains(break_index) {
                self.restart_download();
                return;
            }
        }

        self.start_or_continue_download();
    }

    /// Applies an event reported by a streaming task.
    ///
    /// Events from sessions that were already replaced are ignored.
    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Chunk { generation, data } => {
                let Some(session) = self
                    .session
                    .as_mut()
                    .filter(|session| session.generation() == generation)
                else {
                    tracing::trace!("Dropping chunk from stale session {}", generation);
                    return;
                };

                session.write_chunk(&mut self.buffer, &data);
                self.stats.bytes_fetched += data.len() as u64;
                self.state = SessionState::Draining;
                self.drain();
                if self.session.is_some() && !self.destroyed {
                    self.state = SessionState::Fetching;
                }
            }
            SessionEvent::Ended {
                generation,
                outcome,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                let Some(session) = self.session.take() else {
                    return;
                };
                self.state = SessionState::Idle;

                match outcome {
                    Err(e) => {
                        self.stats.transport_errors += 1;
                        tracing::warn!(
                            "Download of {} range {} failed after {} bytes: {}",
                            self.url,
                            session.range(),
                            session.received(),
                            e
                        );
                    }
                    Ok(()) if session.received() == 0 => {
                        tracing::debug!("Range {} ended without data", session.range());
                    }
                    Ok(()) => {
                        tracing::debug!(
                            "Range {} complete ({} bytes)",
                            session.range(),
                            session.received()
                        );
                        self.seek.clear_break();
                        self.start_or_continue_download();
                    }
                }
            }
        }
    }

    /// Stops all fetches and abandons pending requests.
    ///
    /// Idempotent. Abandoned requesters observe `WebSeedError::ConnectionClosed`.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.state = SessionState::Ended;

        if let Some(session) = self.session.take() {
            session.abort();
        }
        self.root_token.cancel();

        let abandoned = self.queue.abandon_all();
        tracing::debug!(
            "Web seed for {} destroyed, {} pending pieces abandoned",
            self.url,
            abandoned
        );
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            pending_pieces: self.queue.len(),
            loaded_bytes: self.buffer.loaded_bytes(),
            state: self.state,
            destroyed: self.destroyed,
            ..self.stats.clone()
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.generation() == generation)
    }

    fn is_available(&self, index: PieceIndex) -> bool {
        self.cache.contains(index) || self.buffer.is_loaded(&self.layout.piece_range(index))
    }

    /// Opens a new sequential fetch unless one is running or nothing is missing.
    fn start_or_continue_download(&mut self) {
        if self.destroyed || self.session.is_some() {
            return;
        }

        self.state = SessionState::Scanning;
        let Some(range) = plan_range(&self.layout, self.seek.restart_index(), |index| {
            self.is_available(index)
        }) else {
            tracing::debug!("Every piece of {} is available", self.url);
            self.state = SessionState::Idle;
            return;
        };

        let request_range = if range.covers(self.layout.total_length()) {
            None
        } else {
            Some(range)
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let cancel = self.root_token.child_token();

        tracing::debug!(
            "Starting session {} for {} range {}",
            generation,
            self.url,
            range
        );

        self.session = Some(DownloadSession::new(generation, range, cancel.clone()));
        self.stats.sessions_started += 1;
        self.state = SessionState::Fetching;

        tokio::spawn(stream_range(
            self.fetcher.clone(),
            self.url.clone(),
            request_range,
            cancel,
            generation,
            self.events.clone(),
        ));
    }

    /// Aborts the running fetch and starts over from the restart index.
    fn restart_download(&mut self) {
        if self.destroyed {
            return;
        }
        self.seek.clear_break();

        if let Some(session) = self.session.take() {
            self.state = SessionState::Aborting;
            session.abort();
            self.stats.sessions_aborted += 1;
            tracing::debug!(
                "Aborted session {} at offset {}",
                session.generation(),
                session.loaded_offset()
            );
        }

        self.start_or_continue_download();
    }

    /// Resolves every pending piece whose bytes are fully buffered.
    fn drain(&mut self) {
        let mut restart = false;

        for index in self.queue.indices() {
            let range = self.layout.piece_range(index);
            if !self.buffer.is_loaded(&range) {
                continue;
            }
            if let Some(responders) = self.queue.take(index) {
                resolve_all(responders, &self.buffer.slice(range));
            }
            if self.seek.take_break(index) {
                restart = true;
            }
        }

        if restart {
            self.restart_download();
        }
    }

    fn serve_last_piece(&mut self, responder: PieceResponder) {
        let range = self.layout.last_piece_range();
        if self.buffer.is_loaded(&range) {
            let _ = responder.send(Ok(self.buffer.slice(range)));
            return;
        }

        self.stats.last_piece_fetches += 1;
        let fetcher = self.fetcher.clone();
        let url = self.url.clone();
        let cancel = self.root_token.child_token();
        let expected = range.end - range.start;
        let range = ByteRange::from(range);

        tracing::debug!("Fetching last piece of {} as range {}", url, range);

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                // Destroyed: the requester only sees the dropped sender
                _ = cancel.cancelled() => return,
                result = fetch_exact(&*fetcher, &url, Some(range), expected, cancel.clone()) => result,
            };
            let result = result.map_err(|source| WebSeedError::LastPieceFetch { source });
            if let Err(e) = &result {
                tracing::warn!("Last piece fetch for {} failed: {}", url, e);
            }
            let _ = responder.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::oneshot;

    use super::*;
    use crate::cache::MemoryPieceCache;
    use crate::transport::{MockBehavior, MockRangeFetcher};

    struct Harness {
        server: PieceServer,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        fetcher: MockRangeFetcher,
        cache: Arc<MemoryPieceCache>,
        data: Bytes,
    }

    fn resource(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 239) as u8).collect::<Vec<_>>())
    }

    fn harness(fetcher_for: impl FnOnce(Bytes) -> MockRangeFetcher) -> Harness {
        let data = resource(1000);
        let fetcher = fetcher_for(data.clone());
        let cache = Arc::new(MemoryPieceCache::new());
        let (events_tx, events) = mpsc::unbounded_channel();
        let server = PieceServer::new(
            Url::parse("http://example.com/video.mkv").unwrap(),
            ResourceLayout::new(1000, 100).unwrap(),
            cache.clone(),
            Arc::new(fetcher.clone()),
            events_tx,
        );
        Harness {
            server,
            events,
            fetcher,
            cache,
            data,
        }
    }

    impl Harness {
        fn request(&mut self, index: u32) -> oneshot::Receiver<crate::Result<Bytes>> {
            let (tx, rx) = oneshot::channel();
            self.server.request_piece(PieceIndex::new(index), tx);
            rx
        }

        /// Feeds events to the server until the current session ends.
        async fn pump_until_idle(&mut self) {
            while self.server.session.is_some() {
                let Some(event) = self.events.recv().await else {
                    return;
                };
                self.server.handle_session_event(event);
            }
        }

        /// Feeds events to the server until `rx` is answered.
        async fn pump_until_resolved(
            &mut self,
            rx: &mut oneshot::Receiver<crate::Result<Bytes>>,
        ) -> crate::Result<Bytes> {
            loop {
                match rx.try_recv() {
                    Ok(result) => return result,
                    Err(oneshot::error::TryRecvError::Closed) => {
                        return Err(WebSeedError::ConnectionClosed);
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {}
                }
                let event = self.events.recv().await.unwrap();
                self.server.handle_session_event(event);
            }
        }

        fn piece(&self, index: u32) -> Bytes {
            let start = index as usize * 100;
            self.data.slice(start..(start + 100).min(self.data.len()))
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let mut h = harness(|data| MockRangeFetcher::new(data, 50));
        h.cache.insert(PieceIndex::new(3), Bytes::from_static(b"cached"));

        let mut rx = h.request(3);

        assert_eq!(rx.try_recv().unwrap().unwrap(), Bytes::from_static(b"cached"));
        assert_eq!(h.fetcher.fetch_count(), 0);
        assert_eq!(h.server.stats().highest_cache_served, Some(PieceIndex::new(3)));
    }

    #[tokio::test]
    async fn test_invalid_index_rejected() {
        let mut h = harness(|data| MockRangeFetcher::new(data, 50));

        let mut rx = h.request(10);

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(WebSeedError::InvalidPieceIndex { piece_count: 10, .. })
        ));
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_first_request_fetches_whole_resource() {
        let mut h = harness(|data| MockRangeFetcher::new(data, 64));

        let mut rx = h.request(0);
        let piece = h.pump_until_resolved(&mut rx).await.unwrap();

        assert_eq!(piece, h.piece(0));
        assert_eq!(h.fetcher.requests(), vec![None]);
    }

    #[tokio::test]
    async fn test_buffered_piece_served_immediately() {
        let mut h = harness(|data| MockRangeFetcher::new(data, 1000));

        let mut first = h.request(0);
        h.pump_until_resolved(&mut first).await.unwrap();
        h.pump_until_idle().await;

        let mut rx = h.request(5);
        assert_eq!(rx.try_recv().unwrap().unwrap(), h.piece(5));
        assert_eq!(h.fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_request_shares_bytes() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let mut first = h.request(2);
        let mut second = h.request(2);
        assert_eq!(h.server.stats().pending_pieces, 1);

        h.fetcher.release(3);
        let a = h.pump_until_resolved(&mut first).await.unwrap();
        let b = h.pump_until_resolved(&mut second).await.unwrap();

        assert_eq!(a, h.piece(2));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_repeated_request_is_not_a_seek() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let _early: Vec<_> = (0..3).map(|i| h.request(i)).collect();
        let _again = h.request(1);
        let _last = h.request(2);

        assert_eq!(h.server.seek.break_index(), None);
        assert_eq!(h.server.seek.last_queued(), Some(PieceIndex::new(2)));
        assert_eq!(h.server.stats().pending_pieces, 3);

        // The sequence continues from the last new piece
        let _next = h.request(3);
        assert_eq!(h.server.seek.break_index(), None);
        assert_eq!(h.server.stats().sessions_aborted, 0);
    }

    #[tokio::test]
    async fn test_seek_restarts_after_break_piece() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let mut early: Vec<_> = (0..3).map(|i| h.request(i)).collect();
        let mut jumped = h.request(7);
        assert_eq!(h.server.seek.break_index(), Some(PieceIndex::new(2)));

        h.fetcher.release(3);
        for (i, rx) in early.iter_mut().enumerate() {
            assert_eq!(h.pump_until_resolved(rx).await.unwrap(), h.piece(i as u32));
        }

        assert_eq!(h.server.stats().sessions_aborted, 1);
        assert_eq!(h.fetcher.cancelled_count(), 1);

        h.fetcher.wait_for_fetches(2).await;
        assert_eq!(
            h.fetcher.requests(),
            vec![None, Some(ByteRange::new(700, 1000))]
        );

        h.fetcher.release(10);
        assert_eq!(h.pump_until_resolved(&mut jumped).await.unwrap(), h.piece(7));
    }

    #[tokio::test]
    async fn test_seek_behind_served_pieces_restarts_immediately() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let mut first = h.request(0);
        h.fetcher.release(1);
        h.pump_until_resolved(&mut first).await.unwrap();

        let _jumped = h.request(6);

        assert_eq!(h.server.stats().sessions_aborted, 1);
        assert_eq!(h.server.seek.break_index(), None);
        h.fetcher.wait_for_fetches(2).await;
        assert_eq!(h.fetcher.requests()[1], Some(ByteRange::new(600, 1000)));
    }

    #[tokio::test]
    async fn test_last_piece_uses_exact_range() {
        let mut h = harness(|data| MockRangeFetcher::new(data, 30));

        let rx = h.request(9);
        let piece = rx.await.unwrap().unwrap();

        assert_eq!(piece, h.piece(9));
        assert_eq!(h.fetcher.requests(), vec![Some(ByteRange::new(900, 1000))]);
        assert_eq!(h.server.stats().last_piece_fetches, 1);
        assert_eq!(h.server.stats().sessions_started, 0);
    }

    #[tokio::test]
    async fn test_last_piece_failure_reported() {
        let mut h = harness(|data| {
            MockRangeFetcher::with_behavior(data, 30, MockBehavior::RejectStatus(503))
        });

        let result = h.request(9).await.unwrap();

        assert!(matches!(
            result,
            Err(WebSeedError::LastPieceFetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_drops_last_piece_requester() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let rx = h.request(9);
        h.fetcher.wait_for_fetches(1).await;
        h.server.destroy();

        // Closed without an answer, like every other abandoned request
        assert!(rx.await.is_err());
        assert_eq!(h.fetcher.cancelled_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_requests_pending() {
        let mut h = harness(|data| {
            MockRangeFetcher::with_behavior(data, 100, MockBehavior::BreakAfter(1))
        });

        let mut first = h.request(0);
        let mut second = h.request(1);
        assert_eq!(h.pump_until_resolved(&mut first).await.unwrap(), h.piece(0));
        h.pump_until_idle().await;

        let stats = h.server.stats();
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.pending_pieces, 1);
        assert_eq!(stats.state, SessionState::Idle);
        assert!(second.try_recv().is_err());

        h.fetcher.set_behavior(MockBehavior::Immediate);
        let mut retry = h.request(1);
        assert_eq!(h.pump_until_resolved(&mut retry).await.unwrap(), h.piece(1));
        assert_eq!(h.pump_until_resolved(&mut second).await.unwrap(), h.piece(1));
        assert_eq!(h.fetcher.requests()[1], Some(ByteRange::new(100, 1000)));
    }

    #[tokio::test]
    async fn test_destroy_abandons_and_cancels() {
        let mut h = harness(|data| MockRangeFetcher::gated(data, 100));

        let rx = h.request(4);
        h.fetcher.wait_for_fetches(1).await;
        h.server.destroy();
        h.server.destroy();

        assert!(rx.await.is_err());
        assert_eq!(h.fetcher.cancelled_count(), 1);
        assert_eq!(h.server.stats().state, SessionState::Ended);

        let mut late = h.request(5);
        assert!(matches!(
            late.try_recv().unwrap(),
            Err(WebSeedError::ConnectionClosed)
        ));
    }
}
