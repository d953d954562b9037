//! Crate-level error type.
//!
//! A single [`PrefetchError`] covers source IO, HTTP, cancellation and cache faults.
//! Prefetch failures never propagate past a fetch task: they end up as task state
//! plus a log line. The read-through path returns them to the caller.

use std::io;

use reel_cache::CacheError;

/// Result type used by this crate.
pub type PrefetchResult<T> = Result<T, PrefetchError>;

#[derive(Debug, thiserror::Error)]
pub enum PrefetchError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// Operation was cancelled. This is the normal outcome of a superseded fetch.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {status} for {url}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// Request or chunk timed out.
    #[error("request timeout for {0}")]
    Timeout(String),

    /// Locator could not be parsed as a URL.
    #[error("invalid URL '{url}': {reason}")]
    UrlParse {
        url: String,
        reason: url::ParseError,
    },

    /// No source can serve this URI.
    #[error("unsupported URI: {0}")]
    UnsupportedUri(String),

    /// Cache store fault.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<PrefetchError>,
    },
}

impl PrefetchError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        PrefetchError::Message(msg.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        PrefetchError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Whether this is a cancellation, looking through context wrappers.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PrefetchError::Cancelled => true,
            PrefetchError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn url_parse(url: &str, reason: url::ParseError) -> Self {
        PrefetchError::UrlParse {
            url: url.to_string(),
            reason,
        }
    }
}
