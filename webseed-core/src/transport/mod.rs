//! Range-capable fetch transport
//!
//! A `RangeFetcher` opens a cancellable request for a byte range of a remote
//! resource and yields its body as a lazy stream of chunks. The HTTP
//! implementation is used in production; the mock drives tests.

pub mod http;
pub mod test_mocks;

use std::fmt;
use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use http::HttpRangeFetcher;
pub use test_mocks::{MockBehavior, MockRangeFetcher};

/// Body of a range response, in stream order.
pub type ChunkStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Half-open byte range `[start, end)` of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Checks if this range spans the whole resource of `total_length` bytes.
    pub fn covers(&self, total_length: u64) -> bool {
        self.start == 0 && self.end >= total_length
    }

    /// Value for the HTTP `Range` header. HTTP ranges are inclusive.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

impl From<Range<u64>> for ByteRange {
    fn from(range: Range<u64>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Errors raised while opening or reading a range fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Server returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Server ignored range {range} for {url}")]
    RangeIgnored { url: String, range: ByteRange },

    #[error("Server returned bytes from {returned_start} for range {requested} of {url}")]
    RangeMismatch {
        url: String,
        requested: ByteRange,
        returned_start: u64,
    },

    #[error("Stream read failed: {reason}")]
    Stream { reason: String },

    #[error("Expected {expected} bytes, received {received}")]
    ShortBody { expected: u64, received: u64 },

    #[error("Server did not report a content length for {url}")]
    MissingContentLength { url: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Transport capable of streaming a byte range of a remote resource.
///
/// `range == None` requests the whole resource without a `Range` header.
/// Implementations must stop yielding chunks promptly once `cancel` fires.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Opens a range request and returns its body as a chunk stream.
    ///
    /// # Errors
    ///
    /// - `FetchError::Request` - If the request could not be sent
    /// - `FetchError::Status` - If the server answered with a non-success status
    /// - `FetchError::RangeIgnored` - If the server returned the full body for a ranged request
    /// - `FetchError::RangeMismatch` - If a partial response starts at another offset
    /// - `FetchError::Cancelled` - If `cancel` fired before the response arrived
    async fn fetch(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, FetchError>;
}

/// Fetches a range and collects the whole body, which must be `expected_len` bytes.
///
/// Extra trailing bytes are discarded.
///
/// # Errors
///
/// - Any error from `RangeFetcher::fetch` or the chunk stream
/// - `FetchError::ShortBody` - If the body ended before `expected_len` bytes
pub async fn fetch_exact(
    fetcher: &dyn RangeFetcher,
    url: &Url,
    range: Option<ByteRange>,
    expected_len: u64,
    cancel: CancellationToken,
) -> Result<Bytes, FetchError> {
    let mut stream = fetcher.fetch(url, range, cancel).await?;
    let mut body = BytesMut::with_capacity(expected_len as usize);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let remaining = (expected_len as usize).saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        if body.len() as u64 >= expected_len {
            break;
        }
    }

    if (body.len() as u64) < expected_len {
        return Err(FetchError::ShortBody {
            expected: expected_len,
            received: body.len() as u64,
        });
    }
    Ok(body.freeze())
}
