//! One feed session: items, prefetching, hit checks and metrics in one place.
//!
//! This is the surface the list UI and the player talk to:
//! - `on_settled_position` when scrolling comes to rest;
//! - `begin_load` when the player starts preparing an item;
//! - `on_playback_ready` when the player reports the first frame;
//! - `read` for media bytes;
//! - `report` for the cache effectiveness summary.
//!
//! Whether a load was a cache hit is decided when the load starts, before the player's
//! own reads write anything into the store. `read` takes that snapshot itself if
//! `begin_load` was not called.
//!
//! The store is shared, everything else is owned by the session. Dropping or shutting
//! down the session cancels its outstanding fetches.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use reel_cache::{CacheKey, CacheStore, KeyResolver};
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{PrefetchError, PrefetchResult};
use crate::metrics::{LoadMetric, MetricsCollector};
use crate::model::MediaRef;
use crate::read_through::ReadThrough;
use crate::scheduler::{PrefetchScheduler, ScheduleReport};
use crate::settings::PrefetchSettings;
use crate::source::ByteSource;

#[derive(Debug)]
pub struct FeedSession {
    items: Vec<MediaRef>,
    store: Arc<CacheStore>,
    resolver: KeyResolver,
    settings: PrefetchSettings,
    scheduler: PrefetchScheduler,
    metrics: Arc<MetricsCollector>,
    reader: ReadThrough,
    /// Hit flag per position, captured at load start.
    loads: Mutex<HashMap<usize, bool>>,
}

impl FeedSession {
    /// Session spawning its fetches on the current tokio runtime.
    pub fn new(
        store: Arc<CacheStore>,
        source: Arc<dyn ByteSource>,
        resolver: KeyResolver,
        settings: PrefetchSettings,
    ) -> PrefetchResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| PrefetchError::msg(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(store, source, resolver, settings, runtime))
    }

    pub fn with_runtime(
        store: Arc<CacheStore>,
        source: Arc<dyn ByteSource>,
        resolver: KeyResolver,
        settings: PrefetchSettings,
        runtime: Handle,
    ) -> Self {
        let scheduler = PrefetchScheduler::new(
            store.clone(),
            source.clone(),
            resolver.clone(),
            settings.clone(),
            runtime,
        );
        let reader = ReadThrough::new(store.clone(), source).with_idle_timeout(settings.idle_timeout);
        Self {
            items: Vec::new(),
            store,
            resolver,
            metrics: Arc::new(MetricsCollector::new(settings.enabled)),
            settings,
            scheduler,
            reader,
            loads: Mutex::new(HashMap::new()),
        }
    }

    pub fn items(&self) -> &[MediaRef] {
        &self.items
    }

    /// Replace the item list (e.g. after a refresh).
    pub fn set_items(&mut self, items: Vec<MediaRef>) {
        self.items = items;
        self.loads.get_mut().clear();
    }

    /// Append a page of items.
    pub fn append_items(&mut self, items: impl IntoIterator<Item = MediaRef>) {
        let before = self.items.len();
        self.items.extend(items);
        debug!(added = self.items.len() - before, total = self.items.len(), "session: items appended");
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn settings(&self) -> &PrefetchSettings {
        &self.settings
    }

    pub fn set_prefetch_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        self.scheduler.set_enabled(enabled);
        self.metrics.set_prefetch_enabled(enabled);
    }

    pub fn on_settled_position(&mut self, position: usize) -> ScheduleReport {
        self.scheduler.on_settled_position(position, &self.items)
    }

    fn cache_key_at(&self, position: usize) -> Option<CacheKey> {
        let item = self.items.get(position)?;
        if !item.is_prefetchable() {
            return None;
        }
        self.resolver.resolve(&item.locator).ok()
    }

    /// Whether enough of the item at `position` is resident right now to count as a
    /// cache hit.
    ///
    /// Content known to be shorter than the threshold is a hit once all of it is
    /// resident.
    pub fn is_cache_hit(&self, position: usize) -> bool {
        self.cache_key_at(position).is_some_and(|key| {
            let target = self.settings.target_bytes;
            let threshold = self
                .store
                .content_length(&key)
                .map_or(self.settings.effective_hit_threshold(), |len| {
                    len.min(self.settings.effective_hit_threshold())
                });
            let resident = self.store.get_cached_bytes(&key, 0, target);
            resident > 0 && resident >= threshold
        })
    }

    /// Start a load of the item at `position`: snapshot its hit status for the metric
    /// that `on_playback_ready` records. Returns the snapshot, `None` if there is no
    /// such item. Calling it again restarts the load.
    pub fn begin_load(&self, position: usize) -> Option<bool> {
        if position >= self.items.len() {
            return None;
        }
        let hit = self.is_cache_hit(position);
        self.loads.lock().insert(position, hit);
        debug!(position, hit, "session: load started");
        Some(hit)
    }

    /// Record a load of the item at `position`; `None` if there is no such item.
    ///
    /// Uses the hit status captured at load start. Without one (no `begin_load` and no
    /// `read` since the last record) the current status is used.
    pub fn on_playback_ready(&self, position: usize, load_time_ms: u64) -> Option<LoadMetric> {
        if position >= self.items.len() {
            debug!(position, "session: playback ready for unknown position");
            return None;
        }
        let captured = self.loads.lock().remove(&position);
        let hit = captured.unwrap_or_else(|| self.is_cache_hit(position));
        Some(self.metrics.record(position, load_time_ms, hit))
    }

    /// Read media bytes of the item at `position` through the cache.
    pub async fn read(&self, position: usize, offset: u64, len: u64) -> PrefetchResult<Bytes> {
        let item = self
            .items
            .get(position)
            .ok_or_else(|| PrefetchError::msg(format!("no item at position {position}")))?;
        if !item.is_prefetchable() {
            return Err(PrefetchError::msg(format!(
                "item {} is not a video",
                item.id
            )));
        }
        self.loads
            .lock()
            .entry(position)
            .or_insert_with(|| self.is_cache_hit(position));
        match self.resolver.resolve(&item.locator) {
            Ok(key) => self.reader.read(&key, offset, len).await,
            Err(e) => {
                debug!(id = %item.id, "session: uncacheable item err='{}'", e);
                self.reader.read_uncached(&item.locator, offset, len).await
            }
        }
    }

    pub fn report(&self) -> String {
        self.metrics.report()
    }

    /// Cancel outstanding fetches. Idempotent.
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }
}
