//! Error types shared across the crawler.
//!
//! Only configuration problems are fatal: they are surfaced synchronously to
//! the caller before any crawler state changes. Everything else is recovered
//! locally so the crawl keeps making forward progress while the frontier is
//! non-empty or work is in flight.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the crawler and its collaborators.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Invalid configuration, rejected before any crawler state mutation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A page download failed: network, TLS, HTTP status or client trouble.
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Link extraction or a page action failed.
    #[error("page processing failed: {0}")]
    ParseFailed(String),

    /// The stage or client pool has been shut down and rejects new work.
    #[error("pool is closed")]
    PoolClosed,

    /// No idle client became available within the acquisition window.
    #[error("client pool exhausted")]
    PoolExhausted,

    /// A worker pool did not drain within the shutdown grace period.
    #[error("pool failed to terminate within {0:?}")]
    ShutdownTimeout(Duration),

    /// A URL could not be parsed.
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl CrawlError {
    /// Shorthand for a [`CrawlError::FetchFailed`] with a displayable cause.
    pub fn fetch_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        CrawlError::FetchFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
