//! Lookahead prefetching for a short-form media feed.
//!
//! As the user scrolls, the item after the settled position (and a few more) are fetched
//! ahead of time into a bounded [`reel_cache::CacheStore`], so that playback usually
//! starts from local bytes.
//!
//! Modules:
//! - [`model`], [`feed`]: feed items and paged feed generation
//! - [`source`], [`downloader`]: byte-range sources (HTTP, bundled assets)
//! - [`fetch`]: the cancellable, bounded [`FetchTask`]
//! - [`scheduler`]: the [`PrefetchScheduler`] reacting to settled positions
//! - [`read_through`]: the playback read path
//! - [`metrics`]: load-time / cache-hit metrics
//! - [`session`]: the [`FeedSession`] facade tying it together
//! - [`settings`], [`error`]

pub mod downloader;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod read_through;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use reel_cache;

pub use downloader::HttpSource;
pub use error::{PrefetchError, PrefetchResult};
pub use feed::{FeedRepository, sample_catalogue};
pub use fetch::{FetchState, FetchTask, WriteFence};
pub use metrics::{LoadMetric, MetricsCollector, MetricsReport, MetricsSummary};
pub use model::{MediaKind, MediaRef, RenderTarget};
pub use read_through::ReadThrough;
pub use scheduler::{
    FetchHandle, PrefetchScheduler, ScheduleOutcome, ScheduleReport, TaskSnapshot,
    lookahead_window,
};
pub use session::FeedSession;
pub use settings::PrefetchSettings;
pub use source::{AssetSource, ByteSource, ByteStream, SourceRouter};
