//! Bounded byte-range cache store.
//!
//! Entries are keyed by [`CacheKey`] and hold an arbitrary set of byte ranges of the
//! content, backed by one data file per key under the store root. The total number of
//! present bytes across all entries is bounded by a byte budget; when a write pushes
//! the total over budget, least-recently-used entries (other than the one being written)
//! are evicted until it fits again.
//!
//! Locking:
//! - Entry bookkeeping (index, recency, byte accounting) lives behind one mutex.
//! - File IO runs outside of it, serialized per data file only.
//!
//! A write that loses a race against the eviction of its own entry is dropped at commit
//! time instead of re-inserting accounting for a file that no longer exists.
//!
//! Notes:
//! - `get_cached_bytes` is a probe: it never changes recency. Reads and writes do.
//! - The index lives in memory; leftover data files from a previous process are removed
//!   on open, and `release` removes the files it tracked.
//! - Every entry gets its own data file (`<key stem>-<entry id>.bin`). A deferred delete
//!   of an evicted entry can therefore never hit the file of a newer entry for the same
//!   key.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::ranges::RangeSet;

const DATA_EXTENSION: &str = "bin";

/// Point-in-time view of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntrySnapshot {
    pub key: CacheKey,
    pub byte_ranges_present: Vec<Range<u64>>,
    pub total_bytes: u64,
    pub last_access_time: SystemTime,
}

/// One data file. Opened per operation; the lock serializes IO on the same file.
#[derive(Debug)]
struct DataFile {
    path: PathBuf,
    io: Mutex<()>,
}

impl DataFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            io: Mutex::new(()),
        }
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let _io = self.io.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()
    }

    fn read_at(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        let _io = self.io.lock();
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Best-effort delete.
    fn discard(&self) {
        let _io = self.io.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => trace!("cache: removed data file path='{}'", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => trace!(
                "cache: remove ERROR path='{}' err='{}' (best-effort)",
                self.path.display(),
                e
            ),
        }
    }
}

struct Entry {
    ranges: RangeSet,
    last_access: SystemTime,
    /// Set once a source ended at this length.
    content_length: Option<u64>,
    data: Arc<DataFile>,
}

struct Index {
    entries: LruCache<CacheKey, Entry>,
    total_bytes: u64,
    released: bool,
    next_entry_id: u64,
}

impl Index {
    /// Pop LRU entries until the budget holds, never touching `protect`.
    fn evict_over_budget(
        &mut self,
        capacity: u64,
        protect: &CacheKey,
    ) -> Vec<(CacheKey, Arc<DataFile>)> {
        let mut victims = Vec::new();
        while self.total_bytes > capacity {
            match self.entries.peek_lru() {
                Some((key, _)) if key != protect => {}
                _ => break,
            }
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(entry.ranges.total());
            victims.push((key, entry.data));
        }
        victims
    }

    /// Drop `key` if it still refers to `data`.
    fn forget_if_same(&mut self, key: &CacheKey, data: &Arc<DataFile>) -> bool {
        let same = self
            .entries
            .peek(key)
            .is_some_and(|e| Arc::ptr_eq(&e.data, data));
        if same {
            if let Some(entry) = self.entries.pop(key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.ranges.total());
            }
        }
        same
    }
}

/// Bounded, LRU-evicting byte-range store.
///
/// Shared across components as `Arc<CacheStore>`; all methods take `&self`.
pub struct CacheStore {
    root: PathBuf,
    capacity: u64,
    index: Mutex<Index>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.lock();
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("capacity", &self.capacity)
            .field("entries", &index.entries.len())
            .field("total_bytes", &index.total_bytes)
            .field("released", &index.released)
            .finish()
    }
}

impl CacheStore {
    /// Open a store at `config.root`, creating the directory.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        fs::create_dir_all(&config.root)?;
        purge_data_files(&config.root);
        debug!(
            root = %config.root.display(),
            capacity = config.capacity_bytes,
            "cache: store opened"
        );
        Ok(Self {
            root: config.root.clone(),
            capacity: config.capacity_bytes,
            index: Mutex::new(Index {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                released: false,
                next_entry_id: 0,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Bytes present across all entries.
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.index.lock().released
    }

    fn data_path(&self, key: &CacheKey, entry_id: u64) -> PathBuf {
        self.root
            .join(format!("{}-{:x}.{}", key.file_stem(), entry_id, DATA_EXTENSION))
    }

    /// Contiguous bytes present for `key` starting at `offset`, capped at `length`.
    ///
    /// Returns 0 for unknown keys and for a released store. Does not update recency.
    pub fn get_cached_bytes(&self, key: &CacheKey, offset: u64, length: u64) -> u64 {
        let index = self.index.lock();
        if index.released {
            return 0;
        }
        index
            .entries
            .peek(key)
            .map_or(0, |e| e.ranges.contiguous_from(offset, length))
    }

    /// Whether any bytes are present for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let index = self.index.lock();
        !index.released
            && index
                .entries
                .peek(key)
                .is_some_and(|e| !e.ranges.is_empty())
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntrySnapshot> {
        let index = self.index.lock();
        if index.released {
            return None;
        }
        index.entries.peek(key).map(|e| CacheEntrySnapshot {
            key: key.clone(),
            byte_ranges_present: e.ranges.as_slice().to_vec(),
            total_bytes: e.ranges.total(),
            last_access_time: e.last_access,
        })
    }

    /// Content length recorded for `key`, if a source was seen ending.
    pub fn content_length(&self, key: &CacheKey) -> Option<u64> {
        let index = self.index.lock();
        if index.released {
            return None;
        }
        index.entries.peek(key).and_then(|e| e.content_length)
    }

    /// Record that the content of `key` ends at `length`. No-op for unknown keys.
    ///
    /// Bytes already present past `length` are left alone; the value only bounds how
    /// long a resident prefix can get.
    pub fn set_content_length(&self, key: &CacheKey, length: u64) -> CacheResult<()> {
        let mut index = self.index.lock();
        if index.released {
            return Err(CacheError::Released);
        }
        if let Some(entry) = index.entries.peek_mut(key) {
            trace!("cache: LENGTH key='{}' length={}", key, length);
            entry.content_length = Some(length);
        }
        Ok(())
    }

    /// Whether the prefix `0..min(target, content length)` is fully resident.
    ///
    /// A probe like [`get_cached_bytes`](Self::get_cached_bytes).
    pub fn is_prefix_resident(&self, key: &CacheKey, target: u64) -> bool {
        let index = self.index.lock();
        if index.released {
            return false;
        }
        index.entries.peek(key).is_some_and(|e| {
            let want = e.content_length.map_or(target, |len| len.min(target));
            e.ranges.contiguous_from(0, want) >= want
        })
    }

    /// Keys ordered from least to most recently used.
    pub fn lru_keys(&self) -> Vec<CacheKey> {
        let index = self.index.lock();
        index.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// Store `data` at `offset` for `key`.
    ///
    /// Returns the number of bytes that were not present before. Rewriting present
    /// ranges is a no-op. May evict other entries to stay within the budget.
    pub fn write(&self, key: &CacheKey, offset: u64, data: &[u8]) -> CacheResult<u64> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(CacheError::RangeOverflow {
                offset,
                len: data.len() as u64,
            })?;
        let range = offset..end;

        let (file, missing) = {
            let mut index = self.index.lock();
            if index.released {
                return Err(CacheError::Released);
            }
            if !index.entries.contains(key) {
                let entry_id = index.next_entry_id;
                index.next_entry_id += 1;
                let entry = Entry {
                    ranges: RangeSet::new(),
                    last_access: SystemTime::now(),
                    content_length: None,
                    data: Arc::new(DataFile::new(self.data_path(key, entry_id))),
                };
                index.entries.push(key.clone(), entry);
            }
            let Some(entry) = index.entries.get_mut(key) else {
                return Err(CacheError::Released);
            };
            entry.last_access = SystemTime::now();

            let missing = entry.ranges.missing_within(range.clone());
            let new_bytes: u64 = missing.iter().map(|r| r.end - r.start).sum();
            if new_bytes == 0 {
                trace!("cache: WRITE SKIP key='{}' range={:?} (present)", key, range);
                return Ok(0);
            }
            let after = entry.ranges.total() + new_bytes;
            if after > self.capacity {
                let empty = entry.ranges.is_empty();
                if empty {
                    index.entries.pop(key);
                }
                return Err(CacheError::EntryTooLarge {
                    key: key.to_string(),
                    bytes: after,
                    capacity: self.capacity,
                });
            }
            (entry.data.clone(), missing)
        };

        for gap in &missing {
            let start = (gap.start - offset) as usize;
            let end = (gap.end - offset) as usize;
            if let Err(e) = file.write_at(gap.start, &data[start..end]) {
                trace!("cache: WRITE ERROR key='{}' err='{}'", key, e);
                let forgotten = {
                    let mut index = self.index.lock();
                    let empty = index
                        .entries
                        .peek(key)
                        .is_some_and(|entry| entry.ranges.is_empty());
                    empty && index.forget_if_same(key, &file)
                };
                if forgotten {
                    file.discard();
                }
                return Err(CacheError::Unavailable(e));
            }
        }

        let committed = {
            let mut index = self.index.lock();
            let live = !index.released
                && index
                    .entries
                    .peek(key)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.data, &file));
            if live {
                let added = index.entries.get_mut(key).map_or(0, |entry| {
                    entry.last_access = SystemTime::now();
                    entry.ranges.insert(range.clone())
                });
                index.total_bytes += added;
                let victims = index.evict_over_budget(self.capacity, key);
                Some((added, victims))
            } else {
                None
            }
        };
        let Some((added, victims)) = committed else {
            // Entry evicted or released mid-write: its file goes too.
            file.discard();
            if self.is_released() {
                return Err(CacheError::Released);
            }
            trace!("cache: WRITE DROPPED key='{}' (evicted while writing)", key);
            return Ok(0);
        };

        trace!("cache: WRITE key='{}' range={:?} added={}", key, range, added);
        for (victim, data) in victims {
            debug!("cache: EVICT key='{}'", victim);
            data.discard();
        }
        Ok(added)
    }

    /// Read up to `max_len` contiguous present bytes at `offset`.
    ///
    /// Returns `Ok(None)` on a miss. An unreadable data file counts as a miss and drops
    /// the entry.
    pub fn read(&self, key: &CacheKey, offset: u64, max_len: u64) -> CacheResult<Option<Bytes>> {
        let (file, len) = {
            let mut index = self.index.lock();
            if index.released {
                return Err(CacheError::Released);
            }
            let Some(entry) = index.entries.get_mut(key) else {
                trace!("cache: MISS key='{}'", key);
                return Ok(None);
            };
            entry.last_access = SystemTime::now();
            let len = entry.ranges.contiguous_from(offset, max_len);
            if len == 0 {
                trace!("cache: MISS key='{}' offset={}", key, offset);
                return Ok(None);
            }
            (entry.data.clone(), len)
        };

        match file.read_at(offset, len) {
            Ok(bytes) => {
                trace!("cache: HIT key='{}' offset={} len={}", key, offset, len);
                Ok(Some(bytes))
            }
            Err(e) => {
                trace!(
                    "cache: READ ERROR key='{}' err='{}' (treating as miss)",
                    key, e
                );
                if self.index.lock().forget_if_same(key, &file) {
                    file.discard();
                }
                Ok(None)
            }
        }
    }

    /// Remove `key` and its data. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut index = self.index.lock();
            let removed = index.entries.pop(key);
            if let Some(entry) = &removed {
                index.total_bytes = index.total_bytes.saturating_sub(entry.ranges.total());
            }
            removed
        };
        match removed {
            Some(entry) => {
                entry.data.discard();
                true
            }
            None => false,
        }
    }

    /// Flush and tear down all state. Later calls see an empty, unusable store.
    pub fn release(&self) {
        let entries: Vec<Entry> = {
            let mut index = self.index.lock();
            if index.released {
                return;
            }
            index.released = true;
            index.total_bytes = 0;
            let mut drained = Vec::with_capacity(index.entries.len());
            while let Some((_, entry)) = index.entries.pop_lru() {
                drained.push(entry);
            }
            drained
        };
        debug!(entries = entries.len(), "cache: store released");
        for entry in entries {
            entry.data.discard();
        }
    }
}

/// Best-effort removal of data files left by an earlier process.
fn purge_data_files(root: &Path) {
    let Ok(dir) = fs::read_dir(root) else {
        return;
    };
    for entry in dir.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == DATA_EXTENSION) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => trace!("cache: purged stale file path='{}'", path.display()),
            Err(e) => trace!(
                "cache: purge ERROR path='{}' err='{}' (best-effort)",
                path.display(),
                e
            ),
        }
    }
}
