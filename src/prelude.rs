//! A "prelude" for users of the `sitecrawler` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use sitecrawler::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Cookie,
    CrawlProgress,
    Page,
    SiteCrawler,
    // Core traits
    CrawlAction,
    Fetcher,
    LinkExtractor,
    // Error type
    CrawlError,
    // Essential re-export for trait implementation
    async_trait,
};
