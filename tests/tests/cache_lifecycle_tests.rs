//! Store lifecycle under a feed session: eviction while scrolling, release and reopen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use reel_cache::{
    CONSTRAINED_CAPACITY_BYTES, CacheConfig, CacheKey, CacheProvider, CacheStore, MemoryClass,
    NORMAL_CAPACITY_BYTES,
};
use reel_prefetch::{FeedSession, FetchState, HttpSource, MediaRef, PrefetchSettings, SourceRouter};
use reel_tests::{MediaFixture, setup};

const MIB: u64 = 1024 * 1024;

fn scratch(subdir: &str) -> PathBuf {
    let root = std::env::temp_dir()
        .join("reel-prefetch-tests")
        .join(format!("{}-{}", subdir, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    root
}

fn session_over(store: Arc<CacheStore>, settings: PrefetchSettings) -> FeedSession {
    let resolver = reel_cache::KeyResolver::default();
    FeedSession::new(
        store,
        Arc::new(SourceRouter::new(HttpSource::default())),
        resolver,
        settings,
    )
    .expect("session")
}

fn videos(base: &reqwest::Url, count: usize) -> Vec<MediaRef> {
    (0..count)
        .map(|i| MediaRef::video(format!("v{i}"), MediaFixture::url_for(base, &format!("v{i}.mp4"))))
        .collect()
}

#[test]
fn scrolling_evicts_least_recently_written_entries() {
    setup::SERVER_RT.block_on(async {
        let fixture = (0..6).fold(MediaFixture::new(), |f, i| {
            f.with_blob(&format!("v{i}.mp4"), 3 * MIB as usize)
        });
        let base = fixture.start().await;
        let store = Arc::new(
            CacheStore::open(&CacheConfig::new(scratch("life-evict")).capacity_bytes(5 * MIB))
                .expect("open store"),
        );
        let settings = PrefetchSettings::default()
            .lookahead(1)
            .debounce_delay(Duration::ZERO);
        let mut session = session_over(store.clone(), settings);
        session.set_items(videos(&base, 6));

        for position in 0..5 {
            session.on_settled_position(position);
            let tasks = session.scheduler().wait_for_window().await;
            assert!(tasks.iter().all(|t| t.state == FetchState::Completed));
            assert!(store.total_bytes() <= 5 * MIB);
        }

        let key = |i: usize| CacheKey::from(MediaFixture::url_for(&base, &format!("v{i}.mp4")));
        assert_eq!(store.lru_keys(), vec![key(4), key(5)]);
        assert!(!store.contains(&key(1)));
        assert!(session.is_cache_hit(5));
        assert!(!session.is_cache_hit(1));
    });
}

#[test]
fn released_store_is_replaced_by_an_empty_one() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new()
            .with_blob("v0.mp4", MIB as usize)
            .with_blob("v1.mp4", 3 * MIB as usize);
        let base = fixture.start().await;
        let provider = CacheProvider::new(
            CacheConfig::new(scratch("life-release")).capacity_bytes(16 * MIB),
        );
        let store = provider.get_cache().expect("store");
        assert!(Arc::ptr_eq(&store, &provider.get_cache().expect("same store")));

        let mut session = session_over(store.clone(), PrefetchSettings::default().lookahead(1));
        session.set_items(videos(&base, 2));
        session.on_settled_position(0);
        session.scheduler().wait_for_window().await;
        assert!(session.is_cache_hit(1));

        provider.release_cache();
        assert!(!provider.is_open());
        assert!(store.is_released());
        assert!(!session.is_cache_hit(1));

        let fresh = provider.get_cache().expect("reopened");
        assert!(!Arc::ptr_eq(&store, &fresh));
        assert!(fresh.is_empty());
        assert_eq!(fresh.total_bytes(), 0);
        session.shutdown();
    });
}

#[test]
fn clear_removes_the_cache_directory() {
    let root = scratch("life-clear");
    let provider = CacheProvider::new(CacheConfig::new(&root));
    let store = provider.get_cache().expect("store");
    store
        .write(&CacheKey::from("https://cdn.test/a.mp4"), 0, &[1, 2, 3])
        .expect("write");
    assert!(root.exists());

    provider.clear();
    assert!(!root.exists());
    assert!(store.is_released());
}

#[rstest]
#[case(512 * MIB, CONSTRAINED_CAPACITY_BYTES)]
#[case(MIB * 1024, CONSTRAINED_CAPACITY_BYTES)]
#[case(4096 * MIB, NORMAL_CAPACITY_BYTES)]
fn device_memory_selects_budget(#[case] total_ram: u64, #[case] expected: u64) {
    let config = CacheConfig::new(scratch("life-class"))
        .memory_class(MemoryClass::from_total_ram(total_ram));
    assert_eq!(config.capacity_bytes, expected);
}
