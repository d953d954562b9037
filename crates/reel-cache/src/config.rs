//! Cache configuration and capacity policy.
//!
//! The byte budget follows the device memory class: constrained devices get a
//! smaller cache so that prefetching never competes with the decoder for RAM-backed
//! page cache. Both budgets can be overridden.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::key::DEFAULT_ASSET_NAMESPACE;

const MIB: u64 = 1024 * 1024;

/// Budget on memory-constrained devices.
pub const CONSTRAINED_CAPACITY_BYTES: u64 = 50 * MIB;
/// Budget on everything else.
pub const NORMAL_CAPACITY_BYTES: u64 = 100 * MIB;

/// Devices with at most this much RAM count as constrained.
const CONSTRAINED_RAM_BYTES: u64 = 1024 * MIB;

/// Device memory class used to pick the default cache budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryClass {
    Constrained,
    #[default]
    Normal,
}

impl MemoryClass {
    /// Best-effort detection from `/proc/meminfo`; falls back to [`MemoryClass::Normal`].
    pub fn detect() -> Self {
        let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
            return MemoryClass::Normal;
        };
        let class = Self::from_meminfo(&meminfo).unwrap_or_default();
        debug!(?class, "cache: detected memory class");
        class
    }

    fn from_meminfo(meminfo: &str) -> Option<Self> {
        let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(Self::from_total_ram(kib * 1024))
    }

    pub fn from_total_ram(bytes: u64) -> Self {
        if bytes <= CONSTRAINED_RAM_BYTES {
            MemoryClass::Constrained
        } else {
            MemoryClass::Normal
        }
    }

    /// Default byte budget for the class.
    pub fn capacity_bytes(self) -> u64 {
        match self {
            MemoryClass::Constrained => CONSTRAINED_CAPACITY_BYTES,
            MemoryClass::Normal => NORMAL_CAPACITY_BYTES,
        }
    }
}

/// Configuration for a [`CacheStore`](crate::CacheStore).
#[derive(Clone)]
pub struct CacheConfig {
    /// Directory holding the data files. Created on open.
    pub root: PathBuf,

    /// Total byte budget across all entries.
    /// Default: derived from [`MemoryClass::Normal`] (100 MiB).
    pub capacity_bytes: u64,

    /// Namespace for synthetic bundled-asset keys.
    /// Default: `reel.local`.
    pub asset_namespace: String,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("root", &self.root)
            .field("capacity_mib", &(self.capacity_bytes / MIB))
            .field("asset_namespace", &self.asset_namespace)
            .finish()
    }
}

impl CacheConfig {
    /// Config rooted at `root` with the default budget.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            capacity_bytes: MemoryClass::Normal.capacity_bytes(),
            asset_namespace: DEFAULT_ASSET_NAMESPACE.to_string(),
        }
    }

    /// Config under `<base>/media` with a budget for the detected memory class.
    pub fn for_device(base: impl AsRef<Path>) -> Self {
        Self::new(base.as_ref().join("media")).memory_class(MemoryClass::detect())
    }

    pub fn memory_class(mut self, class: MemoryClass) -> Self {
        self.capacity_bytes = class.capacity_bytes();
        self
    }

    pub fn capacity_bytes(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    pub fn asset_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.asset_namespace = namespace.into();
        self
    }
}
