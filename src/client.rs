//! # Client Pool Module
//!
//! A fixed-size pool of configured HTTP clients for the fetch stage.
//!
//! ## Overview
//!
//! The pool is sized to the fetch stage's worker count, so under normal
//! operation an acquire never waits: each worker holds at most one client at
//! a time. Acquisition still has a bounded wait so that a misbehaving
//! collaborator degrades into a failed fetch instead of a hung worker.
//!
//! Clients are built once, at pool construction, with the configured redirect
//! policy. Cookies are kept on the pool and assembled into a `Cookie` header
//! per request, which lets `clear_cookies` take effect on live clients. The
//! javascript flag is advisory: the plain HTTP fetcher cannot execute
//! scripts, but fetcher implementations that can render honor it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::error::CrawlError;

/// How long an acquire will wait for an idle client before giving up.
const ACQUIRE_WAIT: Duration = Duration::from_secs(5);
const ACQUIRE_RETRY: Duration = Duration::from_millis(50);

/// A cookie sent with every request whose host falls under `domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl Cookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
        }
    }

    /// Whether this cookie applies to the given host.
    fn matches(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        domain.is_empty() || host == domain || host.ends_with(&format!(".{domain}"))
    }
}

/// Client behavior captured at pool construction.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientConfig {
    pub disable_redirects: bool,
    pub enable_javascript: bool,
    pub cookies: Vec<Cookie>,
}

/// A single configured client checked out of the pool.
pub struct PooledClient {
    http: reqwest::Client,
    javascript_enabled: bool,
    cookies: Arc<Mutex<Vec<Cookie>>>,
}

impl PooledClient {
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn javascript_enabled(&self) -> bool {
        self.javascript_enabled
    }

    /// Assembles the `Cookie` header value for a request to `url`, if any of
    /// the pool's cookies apply to its host.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let header = self
            .cookies
            .lock()
            .iter()
            .filter(|cookie| cookie.matches(host))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }
}

/// A closable pool of identically configured clients.
pub struct ClientPool {
    clients: SegQueue<PooledClient>,
    size: usize,
    name: Mutex<String>,
    cookies: Arc<Mutex<Vec<Cookie>>>,
    closed: AtomicBool,
}

impl ClientPool {
    pub(crate) fn new(size: usize, config: &ClientConfig) -> Result<Self, CrawlError> {
        let cookies = Arc::new(Mutex::new(config.cookies.clone()));
        let clients = SegQueue::new();
        for _ in 0..size {
            let redirect = if config.disable_redirects {
                reqwest::redirect::Policy::none()
            } else {
                reqwest::redirect::Policy::limited(10)
            };
            let http = reqwest::Client::builder()
                .redirect(redirect)
                .build()
                .map_err(|e| CrawlError::Config(format!("failed to build http client: {e}")))?;
            clients.push(PooledClient {
                http,
                javascript_enabled: config.enable_javascript,
                cookies: Arc::clone(&cookies),
            });
        }
        Ok(ClientPool {
            clients,
            size,
            name: Mutex::new("client pool".to_owned()),
            cookies,
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Checks a client out of the pool, waiting briefly for one to come back
    /// if all are in use.
    pub async fn acquire(&self) -> Result<PooledClient, CrawlError> {
        let deadline = tokio::time::Instant::now() + ACQUIRE_WAIT;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CrawlError::PoolClosed);
            }
            if let Some(client) = self.clients.pop() {
                return Ok(client);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::PoolExhausted);
            }
            tokio::time::sleep(ACQUIRE_RETRY).await;
        }
    }

    /// Returns a client to the pool. Clients returned after `close` are
    /// dropped.
    pub fn release(&self, client: PooledClient) {
        if !self.closed.load(Ordering::SeqCst) {
            self.clients.push(client);
        }
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.cookies.lock().push(cookie);
    }

    pub fn clear_cookies(&self) {
        self.cookies.lock().clear();
    }

    /// Releases every idle client and rejects subsequent acquires.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        while self.clients.pop().is_some() {}
        debug!("client pool {} closed", self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> ClientPool {
        ClientPool::new(size, &ClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn acquire_and_release_cycle_clients() {
        let pool = pool(1);
        let client = pool.acquire().await.unwrap();
        pool.release(client);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn close_rejects_subsequent_acquires() {
        let pool = pool(2);
        pool.close();
        assert!(matches!(
            pool.acquire().await,
            Err(CrawlError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn cookie_header_matches_domains() {
        let pool = pool(1);
        pool.add_cookie(Cookie::new("session", "abc", "site.com"));
        pool.add_cookie(Cookie::new("theme", "dark", ".site.com"));
        pool.add_cookie(Cookie::new("other", "1", "elsewhere.com"));

        let client = pool.acquire().await.unwrap();
        let header = client.cookie_header("http://www.site.com/page.html").unwrap();
        assert!(header.contains("session=abc"));
        assert!(header.contains("theme=dark"));
        assert!(!header.contains("other=1"));

        // "mysite.com" must not match the "site.com" cookies.
        assert_eq!(client.cookie_header("http://mysite.com/"), None);
    }

    #[tokio::test]
    async fn clear_cookies_affects_checked_out_clients() {
        let pool = pool(1);
        pool.add_cookie(Cookie::new("session", "abc", "site.com"));
        let client = pool.acquire().await.unwrap();
        assert!(client.cookie_header("http://site.com/").is_some());
        pool.clear_cookies();
        assert_eq!(client.cookie_header("http://site.com/"), None);
    }
}
