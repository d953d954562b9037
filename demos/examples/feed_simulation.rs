//! Scroll through the sample feed with lookahead prefetching and print the
//! cache performance report.
//!
//! Usage: `cargo run -p demos --example feed_simulation [-- --no-prefetch]`
//!
//! Each step settles on the next item, waits a "viewing" interval during which the
//! prefetcher warms the items ahead, then reads the first bytes of the item the way a
//! player would and records the load time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reel_cache::{CacheConfig, CacheProvider};
use reel_prefetch::{
    FeedRepository, FeedSession, HttpSource, PrefetchSettings, RenderTarget, SourceRouter,
};
use tracing::{info, warn};

const STARTUP_BYTES: u64 = 256 * 1024;
const VIEWING_TIME: Duration = Duration::from_secs(3);
const STEPS: usize = 10;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    demos::init_tracing()?;

    let prefetch = !std::env::args().any(|a| a == "--no-prefetch");
    let config = CacheConfig::for_device(std::env::temp_dir().join("reel-demo"));
    info!(?config, prefetch, "starting feed simulation");

    let provider = CacheProvider::new(config);
    provider.clear();
    let store = provider.get_cache()?;

    let settings = PrefetchSettings::default().enabled(prefetch);
    let source = Arc::new(SourceRouter::new(
        HttpSource::default().with_request_timeout(settings.request_timeout),
    ));
    let mut session = FeedSession::new(store, source, provider.key_resolver(), settings)?;

    let mut feed = FeedRepository::sample();
    session.set_items(feed.load_initial());

    for position in 0..STEPS {
        if position + 2 >= session.items().len() {
            let more = feed.load_more();
            info!(page = feed.page(), added = more.len(), "loaded next page");
            session.append_items(more);
        }
        let report = session.on_settled_position(position);
        info!(
            position,
            window = ?report.window,
            launched = report.launched.len(),
            warm = report.already_warm.len(),
            "settled"
        );

        let item = session.items()[position].clone();
        match item.render_target() {
            RenderTarget::Player { locator } => {
                session.begin_load(position);
                let started = Instant::now();
                match session.read(position, 0, STARTUP_BYTES).await {
                    Ok(bytes) => {
                        let elapsed = started.elapsed().as_millis() as u64;
                        if let Some(metric) = session.on_playback_ready(position, elapsed) {
                            info!(
                                position,
                                bytes = bytes.len(),
                                ms = metric.load_time_ms,
                                hit = metric.was_cache_hit,
                                "ready to play {}",
                                locator
                            );
                        }
                    }
                    Err(e) => warn!(position, "playback failed: {}", e),
                }
            }
            RenderTarget::Carousel { images } => {
                info!(position, images = images.len(), "showing carousel");
            }
        }

        tokio::time::sleep(VIEWING_TIME).await;
    }

    session.shutdown();
    println!("{}", session.report());
    provider.release_cache();
    Ok(())
}
