use std::sync::{LazyLock, Once};

use tracing_subscriber::EnvFilter;

/// Runtime shared by all tests of a binary, so fixture servers outlive single tests.
pub static SERVER_RT: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    init_tracing();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("reel_prefetch=debug,reel_cache=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_line_number(false)
            .with_file(false)
            .try_init();
    });
}
