//! # Action Module
//!
//! Defines the `CrawlAction` trait, the plugin seam invoked for every page
//! the crawler touches.
//!
//! ## Overview
//!
//! An action is called once per successfully downloaded page and once per
//! failed download. Actions run inside the parse stage (success) or the
//! fetch-completion consumer (failure); they may produce whatever side
//! effects they like (write reports, collect statistics, assert invariants)
//! but they must not reach back into the crawler's internal state.
//!
//! An action that returns an error is logged under its [`name`] and the crawl
//! continues; the page's discovered links are still followed.
//!
//! [`name`]: CrawlAction::name
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitecrawler::{async_trait, CrawlAction, CrawlError, Page};
//!
//! struct TitlePrinter;
//!
//! #[async_trait]
//! impl CrawlAction for TitlePrinter {
//!     fn name(&self) -> &str {
//!         "title-printer"
//!     }
//!
//!     async fn on_page(&self, url: &str, page: &Page) -> Result<(), CrawlError> {
//!         println!("{url}: {} bytes", page.body.len());
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::CrawlError;
use crate::page::Page;
use async_trait::async_trait;

/// A user-supplied plugin invoked on every fetched page and on every fetch
/// failure.
#[async_trait]
pub trait CrawlAction: Send + Sync {
    /// Short name used in logs when the action fails.
    fn name(&self) -> &str;

    /// Called for every successfully downloaded page.
    async fn on_page(&self, url: &str, page: &Page) -> Result<(), CrawlError>;

    /// Called when a download fails. The default implementation ignores the
    /// failure.
    async fn on_fetch_failure(&self, url: &str, error: &CrawlError) -> Result<(), CrawlError> {
        let _ = (url, error);
        Ok(())
    }
}
