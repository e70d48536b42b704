//! HTTP range fetches over reqwest

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{ByteRange, ChunkStream, FetchError, RangeFetcher};
use crate::config::NetworkConfig;

/// Streams byte ranges from an HTTP(S) server.
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
}

impl HttpRangeFetcher {
    /// Builds a fetcher with the configured user agent and connect timeout.
    ///
    /// # Errors
    ///
    /// - `FetchError::Http` - If the TLS backend or client cannot be initialised
    pub fn new(config: &NetworkConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Discovers the resource length with a HEAD request.
    ///
    /// # Errors
    ///
    /// - `FetchError::Request` - If the request could not be sent
    /// - `FetchError::Status` - If the server answered with a non-success status
    /// - `FetchError::MissingContentLength` - If no usable length was reported
    pub async fn content_length(&self, url: &Url) -> Result<u64, FetchError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // reqwest reports the body length, which is zero for HEAD responses
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|length| *length > 0)
            .ok_or_else(|| FetchError::MissingContentLength {
                url: url.to_string(),
            })
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn fetch(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(header::RANGE, range.header_value());
        }

        tracing::debug!(
            "GET {} range={}",
            url,
            range.map_or_else(|| "full".to_string(), |r| r.to_string())
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = request.send() => response.map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // A 200 for a ranged request carries the body from offset zero
        if let Some(range) = range {
            if status != StatusCode::PARTIAL_CONTENT && range.start > 0 {
                return Err(FetchError::RangeIgnored {
                    url: url.to_string(),
                    range,
                });
            }
            let returned_start = response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(content_range_start);
            if let Some(returned_start) = returned_start.filter(|start| *start != range.start) {
                return Err(FetchError::RangeMismatch {
                    url: url.to_string(),
                    requested: range,
                    returned_start,
                });
            }
        }

        let stream = response
            .bytes_stream()
            .map(|item| {
                item.map_err(|e| FetchError::Stream {
                    reason: e.to_string(),
                })
            })
            .take_until(cancel.cancelled_owned());

        Ok(stream.boxed())
    }
}

/// First byte offset of a `Content-Range: bytes START-END/TOTAL` value.
fn content_range_start(value: &str) -> Option<u64> {
    let (unit, range) = value.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (start, _) = range.trim_start().split_once('-')?;
    start.parse().ok()
}
