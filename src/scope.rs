//! # Scope Module
//!
//! Decides which URLs are eligible for crawling.
//!
//! ## Overview
//!
//! The `ScopePolicy` owns everything the exclusion decision depends on: the
//! two base URLs, the live allowed-suffix list, the concurrent visited set
//! and the blocked-pattern set. A URL is crawlable iff it sits under one of
//! the base URLs, its path carries an allowed suffix, it has not been visited
//! in either its raw or its cleaned form, and no blocked pattern occurs in it.
//!
//! Every dispatched URL is recorded twice: once verbatim and once in its
//! cleaned `host + path` form, so `http`/`https` variants and query-only
//! variants collapse onto a single visit.

use dashmap::DashSet;
use parking_lot::{Mutex, MutexGuard};
use tracing::{error, trace};
use url::Url;

use crate::error::CrawlError;

/// The scope predicate and its backing deduplication state.
#[derive(Debug)]
pub struct ScopePolicy {
    /// The base URL of the site, preferably the non-https version. Starts
    /// with the protocol and does not end with a `/`.
    base_url: String,
    /// The base URL of the https version of the site, if any.
    base_url_secure: Option<String>,
    /// Path suffixes considered parsable pages. Live: may be edited up until
    /// the crawl starts.
    allowed_suffixes: Mutex<Vec<String>>,
    /// URLs already dispatched for download, raw and cleaned forms.
    visited: DashSet<String>,
    /// Substring patterns that must never be crawled.
    blocked: DashSet<String>,
}

impl ScopePolicy {
    pub fn new(
        base_url: impl Into<String>,
        base_url_secure: Option<String>,
    ) -> Result<Self, CrawlError> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(CrawlError::Config("base url cannot be empty".into()));
        }
        Ok(ScopePolicy {
            base_url,
            base_url_secure: base_url_secure.filter(|s| !s.is_empty()),
            allowed_suffixes: Mutex::new(vec![
                "/".to_owned(),
                ".jsp".to_owned(),
                ".htm".to_owned(),
                ".html".to_owned(),
            ]),
            visited: DashSet::new(),
            blocked: DashSet::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn base_url_secure(&self) -> Option<&str> {
        self.base_url_secure.as_deref()
    }

    /// The live allowed-suffix list. Do not edit after the crawl has started.
    pub fn allowed_suffixes(&self) -> MutexGuard<'_, Vec<String>> {
        self.allowed_suffixes.lock()
    }

    pub fn add_blocked(&self, pattern: impl Into<String>) {
        self.blocked.insert(pattern.into());
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// Records a dispatched URL under both its raw and cleaned forms.
    pub fn mark_visited(&self, url: &str) {
        self.visited.insert(url.to_owned());
        if let Some(cleaned) = cleaned_url(url) {
            self.visited.insert(cleaned);
        }
    }

    /// Promotes a relative input to a full URL. Inputs that already carry a
    /// scheme marker are returned verbatim.
    pub fn prepend_base_url_if_needed(&self, url: &str) -> String {
        if url.contains("://") {
            return url.to_owned();
        }
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    /// Returns true if the URL is excluded from crawling: outside both base
    /// URLs, lacking an allowed suffix, already visited (raw or cleaned), or
    /// matching a blocked pattern.
    pub fn is_excluded(&self, url: &str) -> bool {
        let starts_with_base = url.starts_with(&self.base_url);
        let starts_with_base_secure = self
            .base_url_secure
            .as_deref()
            .is_some_and(|base| url.starts_with(base));

        if !starts_with_base && !starts_with_base_secure {
            trace!("outside both base urls: {url}");
            return true;
        }

        // An empty path parses as "/", so a bare base URL counts as the
        // front page.
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_lowercase(),
            Err(_) => url.split('?').next().unwrap_or(url).to_lowercase(),
        };
        let has_allowed_suffix = self
            .allowed_suffixes
            .lock()
            .iter()
            .any(|suffix| path.ends_with(suffix.as_str()));
        if !has_allowed_suffix {
            trace!("not allowing suffix {path} for {url}");
            return true;
        }

        if self.visited.contains(url) {
            trace!("already visited [{url}], skipping it");
            return true;
        }

        if self
            .blocked
            .iter()
            .any(|pattern| url.contains(pattern.key().as_str()))
        {
            trace!("this url is blocked [{url}], skipping it");
            return true;
        }

        if let Some(cleaned) = cleaned_url(url) {
            if self.visited.contains(&cleaned) {
                trace!("the cleaned url was already visited [{url}], skipping it");
                return true;
            }
        }

        false
    }
}

/// Reduces a full URL to its `host + path` form, discarding scheme, port and
/// query. Returns `None` (and logs) when the URL does not parse.
pub fn cleaned_url(url: &str) -> Option<String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let cleaned = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());
            trace!("cleaned up url [{url}] to this: {cleaned}");
            Some(cleaned)
        }
        Err(e) => {
            error!("could not clean up url {url}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScopePolicy {
        ScopePolicy::new("http://site", Some("https://site".to_owned())).unwrap()
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            ScopePolicy::new("", None),
            Err(CrawlError::Config(_))
        ));
    }

    #[test]
    fn cleaned_url_drops_scheme_port_and_query() {
        assert_eq!(cleaned_url("http://h:80/p?x=1").as_deref(), Some("h/p"));
        assert_eq!(cleaned_url("https://h/p"), cleaned_url("http://h/p"));
        assert_eq!(cleaned_url("not a url"), None);
    }

    #[test]
    fn prepend_promotes_relative_paths() {
        let scope = policy();
        assert_eq!(scope.prepend_base_url_if_needed("foo"), "http://site/foo");
        assert_eq!(scope.prepend_base_url_if_needed("/foo"), "http://site/foo");
        assert_eq!(scope.prepend_base_url_if_needed("http://x/y"), "http://x/y");
        assert_eq!(scope.prepend_base_url_if_needed(""), "http://site/");
    }

    #[test]
    fn out_of_scope_urls_are_excluded() {
        let scope = policy();
        assert!(scope.is_excluded("http://other/x.html"));
        assert!(!scope.is_excluded("http://site/x.html"));
        assert!(!scope.is_excluded("https://site/x.html"));
    }

    #[test]
    fn suffix_check_ignores_query_and_case() {
        let scope = policy();
        assert!(!scope.is_excluded("http://site/page.HTML?x=1"));
        assert!(!scope.is_excluded("http://site/dir/"));
        assert!(scope.is_excluded("http://site/file.pdf"));
        assert!(scope.is_excluded("http://site/file.pdf?page=.html"));
    }

    #[test]
    fn bare_base_url_counts_as_the_front_page() {
        let scope = policy();
        assert!(!scope.is_excluded("http://site"));
    }

    #[test]
    fn visited_raw_and_cleaned_forms_both_exclude() {
        let scope = policy();
        scope.mark_visited("http://site/a.html");
        assert!(scope.is_excluded("http://site/a.html"));
        // Same host + path through the secure variant collapses too.
        assert!(scope.is_excluded("https://site/a.html"));
        // Query-only variants collapse onto the cleaned form.
        assert!(scope.is_excluded("http://site/a.html?v=2"));
    }

    #[test]
    fn blocked_patterns_match_as_substrings() {
        let scope = policy();
        scope.add_blocked("/private");
        assert!(scope.is_excluded("http://site/private/index.html"));
        assert!(!scope.is_excluded("http://site/public/index.html"));
    }

    #[test]
    fn exclusion_is_idempotent() {
        let scope = policy();
        scope.add_blocked("/b");
        for url in ["http://site/a.html", "http://site/b.html", "http://elsewhere/"] {
            let first = scope.is_excluded(url);
            assert_eq!(first, scope.is_excluded(url));
        }
    }

    #[test]
    fn allowed_suffixes_are_live() {
        let scope = policy();
        assert!(scope.is_excluded("http://site/feed.xml"));
        scope.allowed_suffixes().push(".xml".to_owned());
        assert!(!scope.is_excluded("http://site/feed.xml"));
    }
}
