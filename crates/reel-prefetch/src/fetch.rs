//! Cancellable, bounded prefetch of one cache key.
//!
//! A [`FetchTask`] warms the first `target_bytes` of a key's content:
//! - skips the prefix that is already resident;
//! - opens a bounded source range for the rest and streams chunks into the store;
//! - checks cancellation between chunks, and again right before each write.
//!
//! Writes go through a [`WriteFence`]. The scheduler advances the fence generation when
//! it cancels a cycle; a task from an older generation can no longer write once that
//! happens, even if it has not observed its cancellation token yet.
//!
//! Outcomes map onto [`FetchState`]: success is `Completed`, a cancellation is
//! `Cancelled` (expected, logged at debug), anything else is `Failed` (logged at warn).
//! Bytes written before a failure stay in the store; the next cycle resumes after them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::{RwLock, RwLockReadGuard};
use reel_cache::{CacheKey, CacheStore};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::error::{PrefetchError, PrefetchResult};
use crate::source::ByteSource;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PROGRESS_STEP_PERCENT: u8 = 25;

/// Lifecycle of a fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchState {
    /// Created, possibly waiting out a start delay.
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl FetchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FetchState::Completed | FetchState::Cancelled | FetchState::Failed
        )
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

/// Generation gate between scheduling cycles and chunk writes.
#[derive(Debug, Clone, Default)]
pub struct WriteFence {
    generation: Arc<RwLock<u64>>,
}

impl WriteFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.read()
    }

    /// Start a new generation, running `f` while no write is in flight.
    pub fn advance<T>(&self, f: impl FnOnce() -> T) -> (u64, T) {
        let mut generation = self.generation.write();
        *generation += 1;
        let out = f();
        (*generation, out)
    }

    /// Held across one write; `None` once `generation` is stale.
    fn enter(&self, generation: u64) -> Option<RwLockReadGuard<'_, u64>> {
        let current = self.generation.read();
        (*current == generation).then_some(current)
    }
}

/// Logs progress each time it crosses a step boundary.
struct ProgressMarks {
    step: u64,
    target: u64,
    next: u64,
}

impl ProgressMarks {
    fn new(step_percent: u8, target: u64, start: u64) -> Self {
        let step = u64::from(step_percent.clamp(1, 100));
        let pct = percent(start, target);
        Self {
            step,
            target,
            next: pct - pct % step + step,
        }
    }

    fn crossed(&mut self, bytes: u64) -> Option<u64> {
        let pct = percent(bytes, self.target);
        if pct < self.next {
            return None;
        }
        let reached = pct - pct % self.step;
        self.next = reached + self.step;
        Some(reached)
    }
}

fn percent(bytes: u64, target: u64) -> u64 {
    if target == 0 {
        return 100;
    }
    (u128::from(bytes.min(target)) * 100 / u128::from(target)) as u64
}

/// Prefetch of `0..target_bytes` of one key.
pub struct FetchTask {
    key: CacheKey,
    target_bytes: u64,
    store: Arc<CacheStore>,
    source: Arc<dyn ByteSource>,
    cancel: CancellationToken,
    fence: WriteFence,
    generation: u64,
    start_delay: Duration,
    idle_timeout: Duration,
    progress_step_percent: u8,
    state: Arc<watch::Sender<FetchState>>,
    progress: Arc<AtomicU64>,
}

impl FetchTask {
    pub fn new(
        key: CacheKey,
        target_bytes: u64,
        store: Arc<CacheStore>,
        source: Arc<dyn ByteSource>,
    ) -> Self {
        let (state, _) = watch::channel(FetchState::Pending);
        Self {
            key,
            target_bytes,
            store,
            source,
            cancel: CancellationToken::new(),
            fence: WriteFence::new(),
            generation: 0,
            start_delay: Duration::ZERO,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            progress_step_percent: DEFAULT_PROGRESS_STEP_PERCENT,
            state: Arc::new(state),
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bind writes to `generation` of `fence`.
    pub fn with_fence(mut self, fence: WriteFence, generation: u64) -> Self {
        self.fence = fence;
        self.generation = generation;
        self
    }

    /// Wait this long in `Pending` before touching the source.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_progress_step(mut self, percent: u8) -> Self {
        self.progress_step_percent = percent;
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    pub fn state(&self) -> FetchState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn state_sender(&self) -> Arc<watch::Sender<FetchState>> {
        self.state.clone()
    }

    pub(crate) fn progress_counter(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    /// Run to completion, returning the resident byte count on success.
    #[instrument(skip(self), fields(key = %self.key, target = self.target_bytes))]
    pub async fn run(self) -> PrefetchResult<u64> {
        let result = self.fetch().await;
        match &result {
            Ok(resident) => {
                transition(&self.state, FetchState::Completed);
                debug!(resident, "prefetch: completed");
            }
            Err(e) if e.is_cancelled() => {
                transition(&self.state, FetchState::Cancelled);
                debug!(
                    written = self.progress.load(Ordering::Relaxed),
                    "prefetch: cancelled"
                );
            }
            Err(e) => {
                transition(&self.state, FetchState::Failed);
                warn!(
                    written = self.progress.load(Ordering::Relaxed),
                    "prefetch: failed err='{}'", e
                );
            }
        }
        result
    }

    async fn fetch(&self) -> PrefetchResult<u64> {
        if !self.start_delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PrefetchError::Cancelled),
                _ = tokio::time::sleep(self.start_delay) => {}
            }
        }
        if self.cancel.is_cancelled() {
            return Err(PrefetchError::Cancelled);
        }
        transition(&self.state, FetchState::Running);

        let mut offset = self.store.get_cached_bytes(&self.key, 0, self.target_bytes);
        self.progress.store(offset, Ordering::Relaxed);
        if self.store.is_prefix_resident(&self.key, self.target_bytes) {
            trace!(offset, "prefetch: already resident");
            return Ok(offset);
        }

        let open = self
            .source
            .open_range(self.key.as_str(), offset, Some(self.target_bytes));
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PrefetchError::Cancelled),
            res = open => res?,
        };

        let mut marks = ProgressMarks::new(self.progress_step_percent, self.target_bytes, offset);
        while offset < self.target_bytes {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PrefetchError::Cancelled),
                next = timeout(self.idle_timeout, stream.next()) => next
                    .map_err(|_| PrefetchError::Timeout(self.key.to_string()))?,
            };
            let Some(chunk) = next else {
                trace!(offset, "prefetch: source ended before target");
                self.record_content_length(offset)?;
                break;
            };
            let chunk = chunk?;

            let remaining = self.target_bytes - offset;
            let chunk = if chunk.len() as u64 > remaining {
                chunk.slice(..remaining as usize)
            } else {
                chunk
            };
            if chunk.is_empty() {
                continue;
            }

            self.write_chunk(offset, &chunk)?;
            offset += chunk.len() as u64;
            self.progress.store(offset, Ordering::Relaxed);
            if let Some(pct) = marks.crossed(offset) {
                debug!(bytes = offset, "prefetch: progress {}%", pct);
            }
        }

        Ok(self.store.get_cached_bytes(&self.key, 0, self.target_bytes))
    }

    /// The source ran dry at `length`, which therefore is the content length.
    fn record_content_length(&self, length: u64) -> PrefetchResult<()> {
        let Some(_fence) = self.fence.enter(self.generation) else {
            return Err(PrefetchError::Cancelled);
        };
        self.store.set_content_length(&self.key, length)?;
        Ok(())
    }

    fn write_chunk(&self, offset: u64, chunk: &Bytes) -> PrefetchResult<()> {
        let Some(_fence) = self.fence.enter(self.generation) else {
            return Err(PrefetchError::Cancelled);
        };
        if self.cancel.is_cancelled() {
            return Err(PrefetchError::Cancelled);
        }
        self.store.write(&self.key, offset, chunk)?;
        Ok(())
    }
}

/// Move to `next` unless the state is already terminal.
pub(crate) fn transition(state: &watch::Sender<FetchState>, next: FetchState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    })
}
