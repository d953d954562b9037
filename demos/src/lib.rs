//! Shared setup for the feed demos.

use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber: INFO by default, prefetch and cache internals at DEBUG.
///
/// `RUST_LOG` directives are applied on top.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("reel_prefetch=debug".parse()?)
        .add_directive("reel_cache=debug".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(false)
        .with_file(false)
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;
    Ok(())
}
