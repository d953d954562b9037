//! Prefetch configuration.
//!
//! One flat settings struct covers the scheduler, fetch tasks and the hit check.
//!
//! Notes:
//! - `target_bytes` bounds how much of each upcoming item is fetched.
//! - `hit_threshold_bytes` decides whether a load counts as a cache hit. It is a
//!   separate knob: a partially warmed item can still count as a hit.

use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Settings for prefetch scheduling and fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchSettings {
    /// Master switch. When off, position changes schedule nothing.
    /// Default: true.
    pub enabled: bool,

    /// How many items after the settled position are prefetched.
    /// Default: 2.
    pub lookahead: usize,

    /// Bytes fetched per upcoming item, from offset 0.
    /// Default: 2 MiB.
    pub target_bytes: u64,

    /// Resident bytes from offset 0 needed for a load to count as a cache hit.
    /// Values above `target_bytes` act as `target_bytes`, see
    /// [`effective_hit_threshold`](Self::effective_hit_threshold).
    /// Default: 1 MiB.
    pub hit_threshold_bytes: u64,

    /// Delay before fetching window members after the first one.
    /// Default: 500ms.
    pub debounce_delay: Duration,

    /// Timeout for opening a source range.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Maximum wait for the next chunk of an open range.
    /// Default: 30 seconds.
    pub idle_timeout: Duration,

    /// Granularity of fetch progress logging, in percent.
    /// Default: 25.
    pub progress_step_percent: u8,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            lookahead: 2,
            target_bytes: 2 * MIB,
            hit_threshold_bytes: MIB,
            debounce_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            progress_step_percent: 25,
        }
    }
}

impl PrefetchSettings {
    // -------------------------
    // Constructors
    // -------------------------

    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Smaller window and target for quick warm-up on fast scrolling.
    pub fn responsive(mut self) -> Self {
        self.lookahead = 1;
        self.target_bytes = MIB;
        self.hit_threshold_bytes = 512 * KIB;
        self
    }

    /// Minimal data usage: one item ahead, small target, no debounce.
    pub fn bandwidth_saver(mut self) -> Self {
        self.lookahead = 1;
        self.target_bytes = 512 * KIB;
        self.hit_threshold_bytes = 256 * KIB;
        self.debounce_delay = Duration::ZERO;
        self
    }

    /// Hit threshold actually applied: never more than what a prefetch warms.
    pub fn effective_hit_threshold(&self) -> u64 {
        self.hit_threshold_bytes.min(self.target_bytes)
    }

    // -------------------------
    // Builder-style setters
    // -------------------------

    pub fn enabled(mut self, v: bool) -> Self {
        self.enabled = v;
        self
    }

    pub fn lookahead(mut self, v: usize) -> Self {
        self.lookahead = v;
        self
    }

    pub fn target_bytes(mut self, v: u64) -> Self {
        self.target_bytes = v;
        self
    }

    pub fn hit_threshold_bytes(mut self, v: u64) -> Self {
        self.hit_threshold_bytes = v;
        self
    }

    pub fn debounce_delay(mut self, v: Duration) -> Self {
        self.debounce_delay = v;
        self
    }

    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = v;
        self
    }

    pub fn idle_timeout(mut self, v: Duration) -> Self {
        self.idle_timeout = v;
        self
    }

    /// Clamped to `1..=100`.
    pub fn progress_step_percent(mut self, v: u8) -> Self {
        self.progress_step_percent = v.clamp(1, 100);
        self
    }
}
