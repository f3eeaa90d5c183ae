//! # Link Extraction Module
//!
//! The HTML-parsing seam of the parse stage.
//!
//! Extraction is synchronous by design: it is the CPU-bound half of the
//! crawler, and the parsed document never has to live across an await point.
//! The default extractor pulls `a[href]` anchors, resolves them against the
//! page's final URL, strips fragments, and deduplicates within the page. It
//! does not decide scope; candidates are filtered downstream.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

use crate::error::CrawlError;
use crate::page::Page;

/// Extracts outbound link candidates from a downloaded page.
pub trait LinkExtractor: Send + Sync {
    fn extract_links(&self, page: &Page) -> Result<Vec<String>, CrawlError>;
}

/// The default extractor: anchor hrefs from the HTML document.
#[derive(Debug, Default)]
pub struct HtmlLinkExtractor;

impl LinkExtractor for HtmlLinkExtractor {
    fn extract_links(&self, page: &Page) -> Result<Vec<String>, CrawlError> {
        let base = Url::parse(&page.final_url).map_err(|source| CrawlError::InvalidUrl {
            url: page.final_url.clone(),
            source,
        })?;
        let anchors = Selector::parse("a[href]")
            .map_err(|e| CrawlError::ParseFailed(e.to_string()))?;

        let document = Html::parse_document(&page.body);
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for element in document.select(&anchors) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }
            let Ok(mut resolved) = base.join(href) else {
                trace!("dropping unresolvable href {href} on {}", page.url);
                continue;
            };
            resolved.set_fragment(None);
            let link = resolved.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }

        trace!("extracted {} links from {}", links.len(), page.url);
        Ok(links)
    }
}
