//! Playback-side read path: cache first, source for the rest.
//!
//! A read serves the resident prefix from the store and fetches the remainder from the
//! source, writing it through chunk by chunk. Cache faults never fail a read: the first
//! failing write turns write-through off for the rest of that read and bytes keep
//! flowing from the source.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reel_cache::{CacheKey, CacheStore};
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::error::{PrefetchError, PrefetchResult};
use crate::source::{ByteSource, ByteStream};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct ReadThrough {
    store: Arc<CacheStore>,
    source: Arc<dyn ByteSource>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for ReadThrough {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThrough")
            .field("store", &self.store.root())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl ReadThrough {
    pub fn new(store: Arc<CacheStore>, source: Arc<dyn ByteSource>) -> Self {
        Self {
            store,
            source,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Read `offset..offset + len` of `key`. Shorter only if the content ends first.
    #[instrument(skip(self), fields(key = %key), level = "debug")]
    pub async fn read(&self, key: &CacheKey, offset: u64, len: u64) -> PrefetchResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let cached = match self.store.read(key, offset, len) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => Bytes::new(),
            Err(e) => {
                debug!("read-through: cache read failed err='{}' (using source)", e);
                Bytes::new()
            }
        };
        if cached.len() as u64 >= len {
            trace!(len, "read-through: served from cache");
            return Ok(cached);
        }

        let start = offset.saturating_add(cached.len() as u64);
        let end = offset.saturating_add(len);
        let mut out = BytesMut::with_capacity(len.min(MAX_PREALLOC) as usize);
        out.extend_from_slice(&cached);

        let stream = self.source.open_range(key.as_str(), start, Some(end)).await?;
        let mut write_through = true;
        let reached = self.drain(stream, start, end, &mut out, |pos, chunk| {
            if !write_through {
                return;
            }
            if let Err(e) = self.store.write(key, pos, chunk) {
                debug!("read-through: cache write failed err='{}' (continuing uncached)", e);
                write_through = false;
            }
        })
        .await?;
        // Ran dry before `end`: the content ends at `reached`, provided something at or
        // past `start` exists (otherwise `start` may lie past the end).
        if reached < end && (reached > start || !cached.is_empty()) {
            if let Err(e) = self.store.set_content_length(key, reached) {
                trace!("read-through: content length not recorded err='{}'", e);
            }
        }

        trace!(
            cached = cached.len(),
            fetched = out.len() - cached.len(),
            "read-through: assembled"
        );
        Ok(out.freeze())
    }

    /// Read straight from the source, for content without a cache key.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_uncached(&self, uri: &str, offset: u64, len: u64) -> PrefetchResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(len);
        let mut out = BytesMut::with_capacity(len.min(MAX_PREALLOC) as usize);
        let stream = self.source.open_range(uri, offset, Some(end)).await?;
        self.drain(stream, offset, end, &mut out, |_, _| {}).await?;
        Ok(out.freeze())
    }

    async fn drain(
        &self,
        mut stream: ByteStream,
        mut pos: u64,
        end: u64,
        out: &mut BytesMut,
        mut on_chunk: impl FnMut(u64, &[u8]),
    ) -> PrefetchResult<u64> {
        while pos < end {
            let next = timeout(self.idle_timeout, stream.next())
                .await
                .map_err(|_| PrefetchError::Timeout(format!("read at offset {pos}")))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            let take = chunk
                .len()
                .min(usize::try_from(end - pos).unwrap_or(usize::MAX));
            if take == 0 {
                continue;
            }
            on_chunk(pos, &chunk[..take]);
            out.extend_from_slice(&chunk[..take]);
            pos += take as u64;
        }
        Ok(pos)
    }
}
