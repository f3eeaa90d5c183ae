//! # Fetcher Module
//!
//! The download seam between the fetch stage and the network.
//!
//! A `Fetcher` turns one URL into a [`Page`] using a client checked out of
//! the pool by the calling worker. The default implementation is a plain
//! HTTP GET; tests and embedders substitute their own.

use async_trait::async_trait;
use tracing::trace;

use crate::client::PooledClient;
use crate::error::CrawlError;
use crate::page::Page;

/// Downloads a single page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url` with the given client. Failures of any kind (network,
    /// TLS, HTTP status) are reported as [`CrawlError::FetchFailed`].
    async fn fetch(&self, client: &PooledClient, url: &str) -> Result<Page, CrawlError>;
}

/// The default fetcher: an HTTP GET through the pooled client, with the
/// pool's cookies attached. A non-success status code fails the fetch. The
/// pool's javascript flag is ignored here; this fetcher does not render.
#[derive(Debug, Default)]
pub struct HttpFetcher;

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, client: &PooledClient, url: &str) -> Result<Page, CrawlError> {
        let mut request = client.http().get(url);
        if let Some(header) = client.cookie_header(url) {
            request = request.header(reqwest::header::COOKIE, header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CrawlError::fetch_failed(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::fetch_failed(url, format!("http status {status}")));
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::fetch_failed(url, e))?;

        trace!("downloaded {url} ({} bytes)", body.len());
        Ok(Page::new(url, final_url, status.as_u16(), body))
    }
}
