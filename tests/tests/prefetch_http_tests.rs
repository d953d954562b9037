//! Prefetch scheduling against a local HTTP fixture.
//!
//! Covers the feed scenarios end to end: window warm-up, cancellation on position
//! change, warm windows issuing no requests, failures surviving as partial entries that
//! the next cycle resumes, and the playback-ready hit check.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use reel_cache::{CacheConfig, CacheKey, CacheStore, KeyResolver};
use reel_prefetch::{
    FeedSession, FetchState, HttpSource, MediaRef, PrefetchSettings, ScheduleOutcome,
    SourceRouter,
};
use reel_tests::{MediaFixture, setup};

const MIB: usize = 1024 * 1024;

fn storage_root(subdir: &str) -> PathBuf {
    let root = std::env::temp_dir()
        .join("reel-prefetch-tests")
        .join(format!("{}-{}", subdir, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    root
}

fn open_store(subdir: &str, capacity: u64) -> Arc<CacheStore> {
    Arc::new(
        CacheStore::open(&CacheConfig::new(storage_root(subdir)).capacity_bytes(capacity))
            .expect("open store"),
    )
}

fn fixture_with_videos(count: usize, len: usize) -> MediaFixture {
    (0..count).fold(MediaFixture::new(), |fixture, i| {
        fixture.with_blob(&format!("v{i}.mp4"), len)
    })
}

fn feed_items(base: &reqwest::Url, count: usize) -> Vec<MediaRef> {
    (0..count)
        .map(|i| {
            MediaRef::video(
                format!("instance_{i}_{i}"),
                MediaFixture::url_for(base, &format!("v{i}.mp4")),
            )
        })
        .collect()
}

fn http_session(store: Arc<CacheStore>, settings: PrefetchSettings) -> FeedSession {
    let source = Arc::new(SourceRouter::new(HttpSource::default()));
    FeedSession::new(store, source, KeyResolver::default(), settings).expect("session")
}

fn key_for(base: &reqwest::Url, name: &str) -> CacheKey {
    CacheKey::from(MediaFixture::url_for(base, name))
}

#[test]
fn window_is_warmed_to_target() {
    setup::SERVER_RT.block_on(async {
        let fixture = fixture_with_videos(4, 3 * MIB);
        let base = fixture.start().await;
        let store = open_store("http-warm", 64 * MIB as u64);
        let settings = PrefetchSettings::default().debounce_delay(Duration::from_millis(10));
        let mut session = http_session(store.clone(), settings);
        session.set_items(feed_items(&base, 4));

        let report = session.on_settled_position(0);
        assert_eq!(report.window, Some(1..=2));
        assert_eq!(report.launched.len(), 2);

        let tasks = session.scheduler().wait_for_window().await;
        assert!(
            tasks.iter().all(|t| t.state == FetchState::Completed),
            "tasks should complete: {tasks:?}"
        );
        for name in ["v1.mp4", "v2.mp4"] {
            assert_eq!(
                store.get_cached_bytes(&key_for(&base, name), 0, u64::MAX),
                2 * MIB as u64,
                "{name} should hold exactly the target"
            );
            assert_eq!(fixture.request_count_for(name), 1);
        }
        assert_eq!(fixture.request_count_for("v0.mp4"), 0);
        assert_eq!(fixture.request_count_for("v3.mp4"), 0);

        assert!(session.on_playback_ready(1, 95).unwrap().was_cache_hit);
        assert!(!session.on_playback_ready(3, 870).unwrap().was_cache_hit);
    });
}

#[test]
fn position_change_cancels_in_flight_fetches() {
    setup::SERVER_RT.block_on(async {
        let fixture = fixture_with_videos(5, 3 * MIB).with_chunk_delay(Duration::from_millis(40));
        let base = fixture.start().await;
        let store = open_store("http-cancel", 64 * MIB as u64);
        let mut session = http_session(store.clone(), PrefetchSettings::default());
        session.set_items(feed_items(&base, 5));

        let first = session.on_settled_position(0);
        let old: Vec<_> = first
            .launched
            .iter()
            .map(|k| session.scheduler().get(k).expect("registered").subscribe())
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = session.on_settled_position(1);
        assert_eq!(second.cancelled, 2);
        assert_eq!(second.window, Some(2..=3));
        for rx in &old {
            assert_eq!(*rx.borrow(), FetchState::Cancelled);
        }

        // Nothing of v1 may be written once the cycle moved on.
        let v1 = key_for(&base, "v1.mp4");
        let frozen = store.get_cached_bytes(&v1, 0, u64::MAX);
        assert!(frozen < 2 * MIB as u64, "v1 should have been cut short: {frozen}");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get_cached_bytes(&v1, 0, u64::MAX), frozen);

        session.shutdown();
    });
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn warm_window_issues_no_requests(#[case] lookahead: usize) {
    setup::SERVER_RT.block_on(async {
        let fixture = fixture_with_videos(6, 2 * MIB);
        let base = fixture.start().await;
        let store = open_store(&format!("http-rewarm-{lookahead}"), 64 * MIB as u64);
        let settings = PrefetchSettings::default()
            .lookahead(lookahead)
            .debounce_delay(Duration::ZERO);
        let mut session = http_session(store, settings);
        session.set_items(feed_items(&base, 6));

        session.on_settled_position(1);
        session.scheduler().wait_for_window().await;
        fixture.reset_request_counts();

        // Leave and come back: the same window is already warm.
        session.on_settled_position(5);
        let report = session.on_settled_position(1);
        assert!(report.launched.is_empty(), "{report:?}");
        assert_eq!(report.already_warm.len(), lookahead);
        assert_eq!(fixture.total_requests(), 0);

        let again = session.on_settled_position(1);
        assert_eq!(again.outcome, ScheduleOutcome::Unchanged);
    });
}

#[test]
fn failed_fetch_keeps_partial_bytes_and_next_cycle_resumes() {
    setup::SERVER_RT.block_on(async {
        let fixture = fixture_with_videos(3, 3 * MIB)
            .with_chunk_size(16 * 1024)
            .fail_first_after("v1.mp4", 300_000);
        let base = fixture.start().await;
        let store = open_store("http-partial", 64 * MIB as u64);
        let settings = PrefetchSettings::default()
            .lookahead(1)
            .target_bytes(1_000_000)
            .hit_threshold_bytes(1_000_000);
        let mut session = http_session(store.clone(), settings);
        session.set_items(feed_items(&base, 3));

        session.on_settled_position(0);
        let tasks = session.scheduler().wait_for_window().await;
        assert_eq!(tasks[0].state, FetchState::Failed);

        let v1 = key_for(&base, "v1.mp4");
        let partial = store.get_cached_bytes(&v1, 0, 1_000_000);
        assert!(partial <= 300_000, "no bytes past the abort point: {partial}");
        assert!(!session.is_cache_hit(1), "a partial entry below the threshold is a miss");

        // Move away and back; the retry resumes after the resident prefix.
        session.on_settled_position(2);
        session.on_settled_position(0);
        let tasks = session.scheduler().wait_for_window().await;
        assert_eq!(tasks[0].state, FetchState::Completed);
        assert_eq!(fixture.range_starts_for("v1.mp4"), vec![0, partial]);
        assert_eq!(store.get_cached_bytes(&v1, 0, u64::MAX), 1_000_000);
        assert!(session.is_cache_hit(1));
    });
}

#[test]
fn missing_content_fails_without_caching() {
    setup::SERVER_RT.block_on(async {
        let fixture = MediaFixture::new().with_blob("v0.mp4", MIB);
        let base = fixture.start().await;
        let store = open_store("http-404", 64 * MIB as u64);
        let mut session = http_session(store.clone(), PrefetchSettings::default().lookahead(1));
        session.set_items(vec![
            MediaRef::video("a", MediaFixture::url_for(&base, "v0.mp4")),
            MediaRef::video("b", MediaFixture::url_for(&base, "gone.mp4")),
        ]);

        session.on_settled_position(0);
        let tasks = session.scheduler().wait_for_window().await;
        assert_eq!(tasks[0].state, FetchState::Failed);
        assert_eq!(store.get_cached_bytes(&key_for(&base, "gone.mp4"), 0, 1), 0);
        assert!(store.is_empty());
    });
}

#[test]
fn short_content_completes_below_target() {
    setup::SERVER_RT.block_on(async {
        let fixture = fixture_with_videos(2, 300_000);
        let base = fixture.start().await;
        let store = open_store("http-short", 64 * MIB as u64);
        let mut session = http_session(store.clone(), PrefetchSettings::default());
        session.set_items(feed_items(&base, 2));

        session.on_settled_position(0);
        let tasks = session.scheduler().wait_for_window().await;
        assert_eq!(tasks[0].state, FetchState::Completed);
        assert_eq!(
            store.get_cached_bytes(&key_for(&base, "v1.mp4"), 0, u64::MAX),
            300_000
        );
    });
}
