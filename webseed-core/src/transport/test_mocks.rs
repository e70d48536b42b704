//! Scripted range fetcher for testing connections without a network.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{ByteRange, ChunkStream, FetchError, RangeFetcher};

/// How the mock answers fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Every chunk is available immediately.
    Immediate,
    /// Each chunk waits for a permit handed out by `MockRangeFetcher::release`.
    Gated,
    /// The request fails with the given HTTP status.
    RejectStatus(u16),
    /// The stream yields this many chunks, then a read error.
    BreakAfter(usize),
}

/// One fetch observed by the mock.
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub range: Option<ByteRange>,
    pub cancel: CancellationToken,
}

/// In-memory resource served in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct MockRangeFetcher {
    inner: Arc<MockState>,
}

#[derive(Debug)]
struct MockState {
    data: Bytes,
    chunk_size: usize,
    behavior: Mutex<MockBehavior>,
    permits: Arc<Semaphore>,
    records: Mutex<Vec<FetchRecord>>,
    fetched: Notify,
}

impl MockRangeFetcher {
    /// Creates a mock that streams `data` immediately in `chunk_size` chunks.
    pub fn new(data: Bytes, chunk_size: usize) -> Self {
        Self::with_behavior(data, chunk_size, MockBehavior::Immediate)
    }

    /// Creates a mock whose chunks are released one permit at a time.
    pub fn gated(data: Bytes, chunk_size: usize) -> Self {
        Self::with_behavior(data, chunk_size, MockBehavior::Gated)
    }

    pub fn with_behavior(data: Bytes, chunk_size: usize, behavior: MockBehavior) -> Self {
        Self {
            inner: Arc::new(MockState {
                data,
                chunk_size: chunk_size.max(1),
                behavior: Mutex::new(behavior),
                permits: Arc::new(Semaphore::new(0)),
                records: Mutex::new(Vec::new()),
                fetched: Notify::new(),
            }),
        }
    }

    /// Changes the behavior for subsequent fetches.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.inner.behavior.lock() = behavior;
    }

    /// Lets `chunks` more gated chunks through, across all open streams.
    pub fn release(&self, chunks: usize) {
        self.inner.permits.add_permits(chunks);
    }

    /// Ranges requested so far, in order. `None` means the whole resource.
    pub fn requests(&self) -> Vec<Option<ByteRange>> {
        self.inner.records.lock().iter().map(|r| r.range).collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn record(&self, position: usize) -> Option<FetchRecord> {
        self.inner.records.lock().get(position).cloned()
    }

    /// Number of fetches whose cancellation token has fired.
    pub fn cancelled_count(&self) -> usize {
        self.inner
            .records
            .lock()
            .iter()
            .filter(|r| r.cancel.is_cancelled())
            .count()
    }

    /// Waits until at least `count` fetches have been opened.
    pub async fn wait_for_fetches(&self, count: usize) {
        loop {
            let notified = self.inner.fetched.notified();
            if self.fetch_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn chunks_for(&self, range: Option<ByteRange>) -> VecDeque<Bytes> {
        let data = &self.inner.data;
        let len = data.len() as u64;
        let (start, end) = match range {
            Some(range) => (range.start.min(len), range.end.min(len)),
            None => (0, len),
        };

        let body = data.slice(start as usize..end.max(start) as usize);
        let mut chunks = VecDeque::new();
        let mut offset = 0;
        while offset < body.len() {
            let next = (offset + self.inner.chunk_size).min(body.len());
            chunks.push_back(body.slice(offset..next));
            offset = next;
        }
        chunks
    }
}

#[async_trait]
impl RangeFetcher for MockRangeFetcher {
    async fn fetch(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, FetchError> {
        self.inner.records.lock().push(FetchRecord {
            range,
            cancel: cancel.clone(),
        });
        self.inner.fetched.notify_waiters();

        let behavior = *self.inner.behavior.lock();
        let chunks = self.chunks_for(range);

        let body: ChunkStream = match behavior {
            MockBehavior::Immediate => stream::iter(chunks.into_iter().map(Ok)).boxed(),
            MockBehavior::Gated => {
                let permits = self.inner.permits.clone();
                stream::unfold((chunks, permits), |(mut chunks, permits)| async move {
                    let chunk = chunks.pop_front()?;
                    permits.acquire().await.ok()?.forget();
                    Some((Ok(chunk), (chunks, permits)))
                })
                .boxed()
            }
            MockBehavior::RejectStatus(status) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                });
            }
            MockBehavior::BreakAfter(count) => {
                let delivered = chunks.into_iter().take(count).map(Ok);
                let failure = std::iter::once(Err(FetchError::Stream {
                    reason: "connection reset by mock".to_string(),
                }));
                stream::iter(delivered.chain(failure)).boxed()
            }
        };

        Ok(body.take_until(cancel.cancelled_owned()).boxed())
    }
}
