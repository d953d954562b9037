//! Lookahead prefetch scheduling.
//!
//! On every settled position `P` the scheduler:
//! 1. ignores the call if `P` equals the last scheduled position;
//! 2. cancels every unfinished task of the previous cycle and clears the registry;
//! 3. computes the window `P+1 ..= min(P + lookahead, last_index)`;
//! 4. launches one bounded [`FetchTask`] per window video whose key is not already warm,
//!    at most one per key.
//!
//! Image sets and locators without a cache key are never fetched. The first window
//! member starts right away; later members wait out the debounce delay first, so a user
//! flicking past items does not open connections for every one of them.
//!
//! Cancelling a cycle advances the [`WriteFence`] under its write lock: when
//! `on_settled_position` returns, no task of an older cycle can write to the store.
//!
//! `on_settled_position` never blocks on IO. Tasks are spawned on the runtime handle
//! the scheduler was built with, so it can be driven from a non-async thread.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reel_cache::{CacheKey, CacheStore, KeyResolver};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::PrefetchResult;
use crate::fetch::{FetchState, FetchTask, WriteFence, transition};
use crate::model::MediaRef;
use crate::settings::PrefetchSettings;
use crate::source::ByteSource;

/// Registry entry for a launched task.
pub struct FetchHandle {
    key: CacheKey,
    position: usize,
    target_bytes: u64,
    cancel: CancellationToken,
    state: Arc<watch::Sender<FetchState>>,
    progress: Arc<AtomicU64>,
    join: JoinHandle<PrefetchResult<u64>>,
}

impl FetchHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Feed position the task was launched for.
    pub fn position(&self) -> usize {
        self.position
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

    /// Bytes resident from offset 0 as last seen by the task.
    pub fn progress_bytes(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&self) -> FetchState {
        let mut rx = self.state.subscribe();
        let terminal = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        terminal.unwrap_or_else(|_| *rx.borrow())
    }

    /// Signal cancellation; returns whether the task was still live.
    fn cancel(&self) -> bool {
        self.cancel.cancel();
        transition(&self.state, FetchState::Cancelled)
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("key", &self.key)
            .field("position", &self.position)
            .field("state", &self.state())
            .field("progress_bytes", &self.progress_bytes())
            .finish()
    }
}

/// Point-in-time view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub key: CacheKey,
    pub position: usize,
    pub state: FetchState,
    pub progress_bytes: u64,
}

/// Why a position change did or did not schedule work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleOutcome {
    #[default]
    Scheduled,
    /// Same position as the previous call.
    Unchanged,
    /// Prefetching is switched off.
    Disabled,
    /// The scheduler was shut down.
    Stopped,
}

/// What one call to [`PrefetchScheduler::on_settled_position`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScheduleReport {
    pub position: usize,
    pub outcome: ScheduleOutcome,
    pub window: Option<RangeInclusive<usize>>,
    /// Previous-cycle tasks that were still live.
    pub cancelled: usize,
    pub launched: Vec<CacheKey>,
    pub already_warm: Vec<CacheKey>,
    pub deduplicated: Vec<CacheKey>,
    /// Image sets and uncacheable locators.
    pub skipped: usize,
}

/// Lookahead window after `position`, or `None` when there is nothing ahead.
pub fn lookahead_window(
    position: usize,
    len: usize,
    lookahead: usize,
) -> Option<RangeInclusive<usize>> {
    if lookahead == 0 || len == 0 {
        return None;
    }
    let last = len - 1;
    let start = position.checked_add(1)?;
    if start > last {
        return None;
    }
    let end = position.saturating_add(lookahead).min(last);
    Some(start..=end)
}

pub struct PrefetchScheduler {
    store: Arc<CacheStore>,
    source: Arc<dyn ByteSource>,
    resolver: KeyResolver,
    settings: PrefetchSettings,
    runtime: Handle,

    // Parent of every task token; cancelled on shutdown.
    session: CancellationToken,
    fence: WriteFence,
    tasks: HashMap<CacheKey, FetchHandle>,
    last_position: Option<usize>,
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("settings", &self.settings)
            .field("last_position", &self.last_position)
            .field("generation", &self.fence.generation())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl PrefetchScheduler {
    pub fn new(
        store: Arc<CacheStore>,
        source: Arc<dyn ByteSource>,
        resolver: KeyResolver,
        settings: PrefetchSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            source,
            resolver,
            settings,
            runtime,
            session: CancellationToken::new(),
            fence: WriteFence::new(),
            tasks: HashMap::new(),
            last_position: None,
        }
    }

    pub fn settings(&self) -> &PrefetchSettings {
        &self.settings
    }

    pub fn last_position(&self) -> Option<usize> {
        self.last_position
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Switch prefetching on or off. Switching off cancels outstanding work.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.settings.enabled == enabled {
            return;
        }
        self.settings.enabled = enabled;
        if !enabled {
            self.cancel_all();
            self.last_position = None;
        }
        debug!(enabled, "prefetch: toggled");
    }

    /// Handle a settled scroll position over the current item list.
    pub fn on_settled_position(&mut self, position: usize, items: &[MediaRef]) -> ScheduleReport {
        let mut report = ScheduleReport {
            position,
            ..ScheduleReport::default()
        };
        if self.session.is_cancelled() {
            report.outcome = ScheduleOutcome::Stopped;
            return report;
        }
        if !self.settings.enabled {
            report.outcome = ScheduleOutcome::Disabled;
            return report;
        }
        if self.last_position == Some(position) {
            trace!(position, "prefetch: position unchanged");
            report.outcome = ScheduleOutcome::Unchanged;
            return report;
        }
        self.last_position = Some(position);
        report.cancelled = self.cancel_all();

        let Some(window) = lookahead_window(position, items.len(), self.settings.lookahead) else {
            debug!(position, len = items.len(), "prefetch: nothing ahead");
            return report;
        };
        report.window = Some(window.clone());

        let target = self.settings.target_bytes;
        let first = *window.start();
        for index in window {
            let item = &items[index];
            if !item.is_prefetchable() {
                trace!(index, id = %item.id, "prefetch: skip non-video");
                report.skipped += 1;
                continue;
            }
            let key = match self.resolver.resolve(&item.locator) {
                Ok(key) => key,
                Err(e) => {
                    debug!(index, id = %item.id, "prefetch: skip uncacheable err='{}'", e);
                    report.skipped += 1;
                    continue;
                }
            };
            if self.tasks.contains_key(&key) {
                trace!(index, key = %key, "prefetch: already scheduled this cycle");
                report.deduplicated.push(key);
                continue;
            }
            if self.store.is_prefix_resident(&key, target) {
                debug!(index, key = %key, "prefetch: already warm");
                report.already_warm.push(key);
                continue;
            }

            let delay = if index == first {
                Duration::ZERO
            } else {
                self.settings.debounce_delay
            };
            self.launch(key.clone(), index, delay);
            report.launched.push(key);
        }

        debug!(
            position,
            window = ?report.window,
            launched = report.launched.len(),
            warm = report.already_warm.len(),
            cancelled = report.cancelled,
            "prefetch: cycle scheduled"
        );
        report
    }

    fn launch(&mut self, key: CacheKey, position: usize, delay: Duration) {
        let cancel = self.session.child_token();
        let task = FetchTask::new(
            key.clone(),
            self.settings.target_bytes,
            self.store.clone(),
            self.source.clone(),
        )
        .with_cancel_token(cancel.clone())
        .with_fence(self.fence.clone(), self.fence.generation())
        .with_start_delay(delay)
        .with_idle_timeout(self.settings.idle_timeout)
        .with_progress_step(self.settings.progress_step_percent);

        let state = task.state_sender();
        let progress = task.progress_counter();
        let join = self.runtime.spawn(task.run());
        debug!(position, key = %key, delay_ms = delay.as_millis() as u64, "prefetch: launch");

        self.tasks.insert(
            key.clone(),
            FetchHandle {
                key,
                position,
                target_bytes: self.settings.target_bytes,
                cancel,
                state,
                progress,
                join,
            },
        );
    }

    /// Cancel every live task and clear the registry. Returns how many were live.
    fn cancel_all(&mut self) -> usize {
        if self.tasks.is_empty() {
            return 0;
        }
        let tasks = std::mem::take(&mut self.tasks);
        let (generation, cancelled) = self
            .fence
            .advance(|| tasks.values().filter(|h| h.cancel()).count());
        if cancelled > 0 {
            debug!(cancelled, generation, "prefetch: previous cycle cancelled");
        }
        cancelled
    }

    pub fn get(&self, key: &CacheKey) -> Option<&FetchHandle> {
        self.tasks.get(key)
    }

    /// Tasks of the current cycle, ordered by position.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let mut out: Vec<TaskSnapshot> = self
            .tasks
            .values()
            .map(|h| TaskSnapshot {
                key: h.key.clone(),
                position: h.position,
                state: h.state(),
                progress_bytes: h.progress_bytes(),
            })
            .collect();
        out.sort_by_key(|t| t.position);
        out
    }

    pub fn live_task_count(&self) -> usize {
        self.tasks.values().filter(|h| h.state().is_live()).count()
    }

    /// Wait until every task of the current cycle is terminal.
    pub async fn wait_for_window(&self) -> Vec<TaskSnapshot> {
        for handle in self.tasks.values() {
            handle.wait().await;
        }
        self.tasks()
    }

    /// Cancel all work and stop accepting positions. Idempotent.
    pub fn shutdown(&mut self) {
        let cancelled = self.cancel_all();
        if !self.session.is_cancelled() {
            self.session.cancel();
            debug!(cancelled, "prefetch: scheduler shut down");
        }
        self.last_position = None;
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
