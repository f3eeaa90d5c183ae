//! # sitecrawler
//!
//! A polite, bounded-memory web site crawler.
//!
//! Given one or more base URLs, the crawler discovers and fetches in-scope
//! HTML pages, parses them for outbound links, and invokes user-supplied
//! actions on every fetched page. A network-bound fetch pool and a CPU-bound
//! parse pool run side by side, coupled through completion channels and an
//! unbounded frontier with backpressure applied at the dispatch point.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitecrawler::{async_trait, CrawlAction, CrawlError, Page, SiteCrawler};
//!
//! struct CountPages;
//!
//! #[async_trait]
//! impl CrawlAction for CountPages {
//!     fn name(&self) -> &str {
//!         "count-pages"
//!     }
//!
//!     async fn on_page(&self, url: &str, _page: &Page) -> Result<(), CrawlError> {
//!         println!("fetched {url}");
//!         Ok(())
//!     }
//! }
//!
//! async fn crawl_site() -> Result<(), CrawlError> {
//!     let crawler = SiteCrawler::new(
//!         "http://www.site.com",
//!         Some("https://www.site.com".to_owned()),
//!         vec![Box::new(CountPages)],
//!     )?;
//!     crawler.set_blocked(["/logout".to_owned()]);
//!     crawler.navigate().await
//! }
//! ```

pub mod action;
pub mod client;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fetcher;
pub mod frontier;
pub mod page;
pub mod parse;
pub mod prelude;
pub mod scope;
pub mod state;
pub mod stats;

pub use action::CrawlAction;
pub use client::{ClientPool, Cookie, PooledClient};
pub use crawler::SiteCrawler;
pub use error::CrawlError;
pub use extract::{HtmlLinkExtractor, LinkExtractor};
pub use fetcher::{Fetcher, HttpFetcher};
pub use page::Page;
pub use stats::CrawlProgress;

pub use async_trait::async_trait;
pub use dashmap::DashSet;
pub use tokio;
