//! Playback reads through the cache against the HTTP fixture and bundled assets.

use std::path::PathBuf;
use std::sync::Arc;

use reel_cache::{CacheConfig, CacheKey, CacheStore, KeyResolver};
use reel_prefetch::{
    AssetSource, FeedSession, FetchState, HttpSource, MediaRef, PrefetchSettings, ReadThrough,
    SourceRouter,
};
use reel_tests::fixture::pattern;
use reel_tests::{MediaFixture, setup};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

fn scratch(subdir: &str) -> PathBuf {
    let root = std::env::temp_dir()
        .join("reel-prefetch-tests")
        .join(format!("{}-{}", subdir, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    root
}

fn open_store(root: PathBuf) -> Arc<CacheStore> {
    Arc::new(
        CacheStore::open(&CacheConfig::new(root).capacity_bytes(64 * MIB as u64))
            .expect("open store"),
    )
}

fn http_reader(store: Arc<CacheStore>) -> ReadThrough {
    ReadThrough::new(store, Arc::new(SourceRouter::new(HttpSource::default())))
}

#[test]
fn second_read_is_served_from_cache() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new().with_blob("clip.mp4", 2 * MIB);
        let base = fixture.start().await;
        let store = open_store(scratch("rt-second"));
        let reader = http_reader(store.clone());
        let key = CacheKey::from(MediaFixture::url_for(&base, "clip.mp4"));

        let first = reader.read(&key, 0, MIB as u64).await.expect("first read");
        assert_eq!(first, pattern(MIB));
        assert_eq!(fixture.request_count_for("clip.mp4"), 1);

        let again = reader.read(&key, 0, MIB as u64).await.expect("second read");
        assert_eq!(again, first);
        let middle = reader.read(&key, 1000, 5000).await.expect("inner read");
        assert_eq!(&middle[..], &pattern(MIB)[1000..6000]);
        assert_eq!(fixture.request_count_for("clip.mp4"), 1);
    });
}

#[test]
fn read_extends_resident_prefix_from_its_end() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new().with_blob("clip.mp4", 2 * MIB);
        let base = fixture.start().await;
        let store = open_store(scratch("rt-extend"));
        let reader = http_reader(store.clone());
        let key = CacheKey::from(MediaFixture::url_for(&base, "clip.mp4"));

        reader.read(&key, 0, 512 * KIB as u64).await.expect("prefix");
        let full = reader.read(&key, 0, MIB as u64).await.expect("extended");
        assert_eq!(full, pattern(MIB));
        assert_eq!(
            fixture.range_starts_for("clip.mp4"),
            vec![0, 512 * KIB as u64]
        );
        assert_eq!(store.get_cached_bytes(&key, 0, u64::MAX), MIB as u64);
    });
}

#[test]
fn server_ignoring_ranges_still_yields_requested_window() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new()
            .with_blob("clip.mp4", 300_000)
            .ignore_ranges();
        let base = fixture.start().await;
        let store = open_store(scratch("rt-norange"));
        let reader = http_reader(store.clone());
        let key = CacheKey::from(MediaFixture::url_for(&base, "clip.mp4"));

        let bytes = reader.read(&key, 1000, 5000).await.expect("read");
        assert_eq!(&bytes[..], &pattern(300_000)[1000..6000]);
        assert_eq!(store.get_cached_bytes(&key, 1000, 5000), 5000);
        assert_eq!(store.get_cached_bytes(&key, 0, 1000), 0);
    });
}

#[test]
fn read_past_end_is_short() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new().with_blob("clip.mp4", 10_000);
        let base = fixture.start().await;
        let reader = http_reader(open_store(scratch("rt-short")));
        let key = CacheKey::from(MediaFixture::url_for(&base, "clip.mp4"));

        let tail = reader.read(&key, 8_000, 5_000).await.expect("tail");
        assert_eq!(&tail[..], &pattern(10_000)[8_000..]);
        let beyond = reader.read(&key, 20_000, 100).await.expect("beyond");
        assert!(beyond.is_empty());
    });
}

#[test]
fn bundled_assets_are_prefetched_and_read() {
    setup::SERVER_RT.block_on(async {
        let dir = scratch("rt-assets");
        let assets = dir.join("bundle");
        std::fs::create_dir_all(&assets).expect("asset dir");
        std::fs::write(assets.join("intro.mp4"), pattern(300_000)).expect("asset file");

        let store = open_store(dir.join("media"));
        let source = SourceRouter::new(HttpSource::default()).with_assets(AssetSource::new(&assets));
        let resolver = KeyResolver::default();
        let mut session = FeedSession::new(
            store.clone(),
            Arc::new(source),
            resolver.clone(),
            PrefetchSettings::default(),
        )
        .expect("session");
        session.set_items(vec![
            MediaRef::image_set("gallery", ["https://cdn.test/a.jpg"]),
            MediaRef::video("intro", "intro.mp4"),
        ]);

        session.on_settled_position(0);
        let tasks = session.scheduler().wait_for_window().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, FetchState::Completed);

        let key = resolver.resolve("intro.mp4").expect("asset key");
        assert_eq!(key.as_str(), "asset://reel.local/intro.mp4");
        assert_eq!(store.get_cached_bytes(&key, 0, u64::MAX), 300_000);

        let bytes = session.read(1, 100, 200).await.expect("asset read");
        assert_eq!(&bytes[..], &pattern(300_000)[100..300]);
    });
}

#[test]
fn uncacheable_locator_bypasses_the_store() {
    setup::SERVER_RT.block_on(async {
        let store = open_store(scratch("rt-uncacheable"));
        let mut session = FeedSession::new(
            store.clone(),
            Arc::new(SourceRouter::new(HttpSource::default())),
            KeyResolver::default(),
            PrefetchSettings::default(),
        )
        .expect("session");
        session.set_items(vec![
            MediaRef::video("a", "content://provider/clip"),
            MediaRef::video("b", "content://provider/other"),
        ]);

        let report = session.on_settled_position(0);
        assert_eq!(report.skipped, 1);
        assert!(report.launched.is_empty());
        assert!(session.read(0, 0, 10).await.is_err());
        assert!(store.is_empty());
    });
}
