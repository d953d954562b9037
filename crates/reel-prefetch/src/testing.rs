//! In-memory source and store helpers for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use reel_cache::{CacheConfig, CacheStore};

use crate::error::{PrefetchError, PrefetchResult};
use crate::source::{ByteSource, ByteStream};

/// Serves in-memory bodies in fixed-size chunks, optionally slowly or failing midway.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    bodies: Mutex<HashMap<String, Bytes>>,
    fail_after: Mutex<HashMap<String, u64>>,
    opens: Mutex<Vec<(String, u64, Option<u64>)>>,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl ScriptedSource {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub(crate) fn body(self, uri: &str, len: usize) -> Self {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        self.bodies.lock().insert(uri.to_string(), Bytes::from(data));
        self
    }

    /// The stream errors once `bytes` bytes of `uri` have been produced.
    pub(crate) fn fail_after(self, uri: &str, bytes: u64) -> Self {
        self.fail_after.lock().insert(uri.to_string(), bytes);
        self
    }

    pub(crate) fn opens(&self) -> Vec<(String, u64, Option<u64>)> {
        self.opens.lock().clone()
    }
}

#[async_trait]
impl ByteSource for ScriptedSource {
    async fn open_range(
        &self,
        uri: &str,
        start: u64,
        end: Option<u64>,
    ) -> PrefetchResult<ByteStream> {
        self.opens.lock().push((uri.to_string(), start, end));
        let body = self
            .bodies
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| PrefetchError::HttpError {
                status: 404,
                url: uri.to_string(),
            })?;
        let fail_at = self.fail_after.lock().get(uri).copied();

        let end = end.unwrap_or(body.len() as u64).min(body.len() as u64);
        let chunk = self.chunk_size.max(1) as u64;
        let delay = self.chunk_delay;

        let chunks = stream::unfold(start, move |pos| {
            let body = body.clone();
            async move {
                if let Some(fail_at) = fail_at {
                    if pos >= fail_at {
                        return if pos == u64::MAX {
                            None
                        } else {
                            Some((Err(PrefetchError::msg("connection reset")), u64::MAX))
                        };
                    }
                }
                if pos >= end {
                    return None;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let mut next = (pos + chunk).min(end);
                if let Some(fail_at) = fail_at {
                    next = next.min(fail_at.max(pos + 1));
                }
                Some((Ok(body.slice(pos as usize..next as usize)), next))
            }
        });
        Ok(chunks.boxed())
    }
}

pub(crate) fn temp_store(name: &str, capacity: u64) -> Arc<CacheStore> {
    let root: PathBuf = std::env::temp_dir()
        .join("reel-prefetch-tests")
        .join(format!("{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    Arc::new(
        CacheStore::open(&CacheConfig::new(root).capacity_bytes(capacity))
            .expect("open test store"),
    )
}
