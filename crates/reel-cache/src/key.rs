//! Cache key derivation.
//!
//! A [`CacheKey`] identifies *content*, not a feed slot. Feed items get fresh ids per
//! page (`instance_<n>_<id>`), so two items showing the same media must still map to the
//! same key. The key is therefore derived from the item's locator only:
//!
//! - remote locators (`http://` / `https://`) are their own key, unchanged;
//! - bundled asset names map to a synthetic `asset://<namespace>/<name>` URI;
//! - anything else is rejected with [`CacheError::KeyResolutionAmbiguous`] and callers
//!   treat the item as uncacheable.
//!
//! This module does **not** perform any IO.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::trace;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// URI scheme used for keys of bundled assets.
pub const ASSET_SCHEME: &str = "asset";

/// Namespace used when none is configured.
pub const DEFAULT_ASSET_NAMESPACE: &str = "reel.local";

/// Content identity used to index the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key addresses remote content.
    pub fn is_remote(&self) -> bool {
        remote_scheme(&self.0).is_some()
    }

    /// Asset name for `asset://` keys.
    pub fn asset_name(&self) -> Option<&str> {
        let rest = self.0.strip_prefix(ASSET_SCHEME)?.strip_prefix("://")?;
        rest.split_once('/').map(|(_, name)| name)
    }

    /// Stable file stem for the on-disk data file of this key.
    ///
    /// Stable within a given build/toolchain; it relies on the standard library hasher.
    pub fn file_stem(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

fn remote_scheme(locator: &str) -> Option<&'static str> {
    let (scheme, rest) = locator.split_once("://")?;
    if rest.is_empty() {
        return None;
    }
    if scheme.eq_ignore_ascii_case("https") {
        Some("https")
    } else if scheme.eq_ignore_ascii_case("http") {
        Some("http")
    } else {
        None
    }
}

/// Bundled asset names are a single path component of `[A-Za-z0-9._-]`.
fn is_asset_name(locator: &str) -> bool {
    !locator.is_empty()
        && locator != "."
        && locator != ".."
        && locator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Maps item locators to [`CacheKey`]s.
///
/// Cheap to clone; every component that touches the cache (scheduler, hit check,
/// playback read path) holds its own copy so they all agree on identity.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    namespace: Arc<str>,
    known_assets: Option<Arc<HashSet<String>>>,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_NAMESPACE)
    }
}

impl KeyResolver {
    /// Resolver producing `asset://<namespace>/<name>` keys for bundled assets.
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            known_assets: None,
        }
    }

    /// Resolver for the asset namespace of `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.asset_namespace.as_str())
    }

    /// Restrict bundled assets to a known set; other names become ambiguous.
    pub fn with_known_assets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_assets = Some(Arc::new(names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derive the cache key for `locator`.
    pub fn resolve(&self, locator: &str) -> CacheResult<CacheKey> {
        if remote_scheme(locator).is_some() {
            trace!("cache key: remote locator='{}'", locator);
            return Ok(CacheKey::from(locator));
        }

        let known = self
            .known_assets
            .as_ref()
            .is_none_or(|names| names.contains(locator));
        if is_asset_name(locator) && known {
            let key = format!("{ASSET_SCHEME}://{}/{}", self.namespace, locator);
            trace!("cache key: asset locator='{}' -> key='{}'", locator, key);
            return Ok(CacheKey::from(key));
        }

        trace!("cache key: FAIL locator='{}' (uncacheable)", locator);
        Err(CacheError::KeyResolutionAmbiguous(locator.to_string()))
    }

    /// Build the URI a bundled asset resolves to.
    pub fn asset_uri(&self, name: &str) -> String {
        format!("{ASSET_SCHEME}://{}/{}", self.namespace, name)
    }
}
