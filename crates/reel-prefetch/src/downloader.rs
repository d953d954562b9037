//! HTTP byte-range source.
//!
//! Opens `start..end` of a remote URL with a `Range` header. Servers that ignore the
//! header (plain `200 OK`) are handled by dropping the leading bytes locally, so callers
//! always see the requested offset first. A `416` means the range starts at or past the
//! end of the content and yields an empty stream.
//!
//! Retries are left to the caller: a failed prefetch is retried by the next scheduling
//! cycle, not in place.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{Stream, StreamExt};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tokio::time::timeout;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{PrefetchError, PrefetchResult};
use crate::source::{ByteSource, ByteStream, empty_stream};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    request_timeout: Duration,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl HttpSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Timeout for getting response headers.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn range_header(start: u64, end: Option<u64>) -> String {
        match end {
            Some(end) => format!("bytes={}-{}", start, end - 1),
            None => format!("bytes={}-", start),
        }
    }

    /// Streams `url` over `start..end` (`end` exclusive, `None` for open-ended).
    #[instrument(skip(self), level = "debug")]
    pub async fn stream_range(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
    ) -> PrefetchResult<ByteStream> {
        if end.is_some_and(|end| end <= start) {
            return Ok(empty_stream());
        }
        let parsed = Url::parse(url).map_err(|e| PrefetchError::url_parse(url, e))?;
        let url_str = parsed.to_string();

        let request = self
            .client
            .get(parsed)
            .header(RANGE, Self::range_header(start, end))
            .send();
        let response = match timeout(self.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(
                    PrefetchError::msg(format!("request to {} failed: {}", url_str, e))
                        .with_context("opening HTTP range"),
                );
            }
            Err(_) => return Err(PrefetchError::Timeout(url_str)),
        };

        let status = response.status();
        let skip = match status {
            StatusCode::PARTIAL_CONTENT => 0,
            StatusCode::RANGE_NOT_SATISFIABLE => {
                debug!(url = %url_str, start, "range not satisfiable, empty stream");
                return Ok(empty_stream());
            }
            s if s.is_success() => {
                debug!(url = %url_str, start, "server ignored range header");
                start
            }
            s => {
                return Err(PrefetchError::HttpError {
                    status: s.as_u16(),
                    url: url_str,
                });
            }
        };
        let limit = end.map(|end| end - start);

        let body = Self::map_stream_errors(url_str, response.bytes_stream());
        Ok(Self::window(body, skip, limit).boxed())
    }

    fn map_stream_errors(
        url: String,
        stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    ) -> impl Stream<Item = PrefetchResult<Bytes>> + Send + 'static {
        stream.map(move |chunk| {
            chunk.map_err(|e| {
                PrefetchError::Io(std::io::Error::other(format!(
                    "error reading body of {}: {}",
                    url, e
                )))
            })
        })
    }

    /// Drop the first `skip` bytes and stop after `limit` bytes.
    fn window(
        stream: impl Stream<Item = PrefetchResult<Bytes>> + Send + 'static,
        skip: u64,
        limit: Option<u64>,
    ) -> impl Stream<Item = PrefetchResult<Bytes>> + Send + 'static {
        stream
            .scan(
                (skip, limit.unwrap_or(u64::MAX)),
                |(skip, remaining), chunk| {
                    if *remaining == 0 {
                        return future::ready(None);
                    }
                    let out = match chunk {
                        Err(e) => Some(Err(e)),
                        Ok(mut bytes) => {
                            if *skip > 0 {
                                let dropped = (*skip).min(bytes.len() as u64);
                                *skip -= dropped;
                                bytes = bytes.slice(dropped as usize..);
                            }
                            if bytes.is_empty() {
                                None
                            } else {
                                let keep = (*remaining).min(bytes.len() as u64);
                                *remaining -= keep;
                                Some(Ok(bytes.slice(..keep as usize)))
                            }
                        }
                    };
                    future::ready(Some(out))
                },
            )
            .filter_map(future::ready)
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn open_range(
        &self,
        uri: &str,
        start: u64,
        end: Option<u64>,
    ) -> PrefetchResult<ByteStream> {
        self.stream_range(uri, start, end).await
    }
}
