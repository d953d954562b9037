//! Byte sources for cache misses and prefetches.
//!
//! A [`ByteSource`] opens a bounded byte range of a content URI and yields it as a
//! stream of chunks. Fetch tasks and the read-through reader only talk to this trait;
//! [`SourceRouter`] picks the concrete source by URI scheme:
//! - `http` / `https`: [`HttpSource`](crate::downloader::HttpSource)
//! - `asset`: [`AssetSource`], files of a bundled asset directory

use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reel_cache::{ASSET_SCHEME, CacheKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::trace;
use url::Url;

use crate::downloader::HttpSource;
use crate::error::{PrefetchError, PrefetchResult};

/// Chunk stream produced by a [`ByteSource`].
pub type ByteStream = BoxStream<'static, PrefetchResult<Bytes>>;

/// Something that can serve byte ranges of content URIs.
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    /// Open `start..end` of `uri` (`end` exclusive, `None` reads to the end).
    async fn open_range(&self, uri: &str, start: u64, end: Option<u64>)
    -> PrefetchResult<ByteStream>;
}

/// An empty chunk stream.
pub fn empty_stream() -> ByteStream {
    stream::empty().boxed()
}

/// Serves `asset://<namespace>/<name>` URIs from files under a directory.
#[derive(Debug, Clone)]
pub struct AssetSource {
    root: PathBuf,
}

impl AssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, uri: &str) -> PrefetchResult<PathBuf> {
        let key = CacheKey::from(uri);
        let name = key
            .asset_name()
            .filter(|n| !n.is_empty() && !n.contains('/') && *n != "." && *n != "..")
            .ok_or_else(|| PrefetchError::UnsupportedUri(uri.to_string()))?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ByteSource for AssetSource {
    async fn open_range(
        &self,
        uri: &str,
        start: u64,
        end: Option<u64>,
    ) -> PrefetchResult<ByteStream> {
        if end.is_some_and(|end| end <= start) {
            return Ok(empty_stream());
        }
        let path = self.path_for(uri)?;
        trace!("asset: open path='{}' start={} end={:?}", path.display(), start, end);

        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| PrefetchError::Io(e).with_context("opening bundled asset"))?;
        file.seek(SeekFrom::Start(start)).await?;

        let reader: Box<dyn AsyncRead + Send + Unpin> = match end {
            Some(end) => Box::new(file.take(end - start)),
            None => Box::new(file),
        };
        Ok(ReaderStream::new(reader)
            .map(|chunk| chunk.map_err(PrefetchError::from))
            .boxed())
    }
}

/// Dispatches URIs to the matching source by scheme.
#[derive(Debug, Clone, Default)]
pub struct SourceRouter {
    http: HttpSource,
    assets: Option<AssetSource>,
}

impl SourceRouter {
    pub fn new(http: HttpSource) -> Self {
        Self { http, assets: None }
    }

    pub fn with_assets(mut self, assets: AssetSource) -> Self {
        self.assets = Some(assets);
        self
    }
}

#[async_trait]
impl ByteSource for SourceRouter {
    async fn open_range(
        &self,
        uri: &str,
        start: u64,
        end: Option<u64>,
    ) -> PrefetchResult<ByteStream> {
        let parsed = Url::parse(uri).map_err(|e| PrefetchError::url_parse(uri, e))?;
        match parsed.scheme() {
            "http" | "https" => self.http.open_range(uri, start, end).await,
            scheme if scheme == ASSET_SCHEME => match &self.assets {
                Some(assets) => assets.open_range(uri, start, end).await,
                None => Err(PrefetchError::UnsupportedUri(uri.to_string())),
            },
            _ => Err(PrefetchError::UnsupportedUri(uri.to_string())),
        }
    }
}
