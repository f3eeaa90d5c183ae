//! # Statistics Module
//!
//! Point-in-time progress reporting for a running crawl.
//!
//! ## Overview
//!
//! A `CrawlProgress` is a consistent-enough snapshot of the four crawl
//! counters plus the frontier depth, captured whenever somebody asks. It is
//! the single source of truth for all presentation: the human-readable
//! progress line the coordinator logs every couple of thousand visits, and
//! the JSON export for anything that wants to scrape the numbers instead.
//!
//! `left_to_crawl` subtracts the thread limit from the queued work and can
//! dip below zero near the end of a crawl; that is a reporting artifact and
//! is never consulted for scheduling decisions.

use std::fmt;

use serde::Serialize;

use crate::state::CrawlState;

/// A snapshot of crawl progress, used for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlProgress {
    /// Fetch completions consumed so far.
    pub actually_visited: usize,
    /// Queued plus in-flight downloads, minus the worker count.
    pub left_to_crawl: i64,
    /// Fetch jobs submitted but not yet drained.
    pub links_scheduled: i64,
    /// Parse jobs submitted but not yet drained.
    pub pages_scheduled: i64,
    /// URLs dispatched for download so far.
    pub visited: usize,
    /// Estimated completion percentage, rounded to two decimals.
    pub percent_complete: f64,
}

impl CrawlProgress {
    pub(crate) fn capture(state: &CrawlState, frontier_len: usize, thread_limit: usize) -> Self {
        let links_scheduled = state.links_scheduled();
        let pages_scheduled = state.pages_scheduled();
        let visited = state.visited_count();
        let left_to_crawl = frontier_len as i64 + links_scheduled - thread_limit as i64;
        let percent_complete =
            (visited as f64 / (visited as i64 + left_to_crawl) as f64 * 10000.0).round() / 100.0;

        CrawlProgress {
            actually_visited: state.actually_visited_count(),
            left_to_crawl,
            links_scheduled,
            pages_scheduled,
            visited,
            percent_complete,
        }
    }

    /// Serializes the snapshot as a JSON object.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for CrawlProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} crawled. {} left to crawl. {} scheduled for download. {} scheduled for processing. {}% complete.",
            self.actually_visited,
            self.left_to_crawl,
            self.links_scheduled,
            self.pages_scheduled,
            format_percent(self.percent_complete)
        )
    }
}

/// Formats the percentage the way the progress line has always printed it:
/// whole numbers keep one decimal (`50.0`), everything else prints as-is,
/// and the degenerate zero-denominator cases show up as `NaN` / `Infinity`.
fn format_percent(pct: f64) -> String {
    if pct.is_nan() {
        "NaN".to_owned()
    } else if pct.is_infinite() {
        if pct > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if pct == pct.trunc() {
        format!("{pct:.1}")
    } else {
        format!("{pct}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(
        actually_visited: usize,
        left_to_crawl: i64,
        links: i64,
        pages: i64,
        visited: usize,
    ) -> CrawlProgress {
        let percent_complete = (visited as f64 / (visited as i64 + left_to_crawl) as f64
            * 10000.0)
            .round()
            / 100.0;
        CrawlProgress {
            actually_visited,
            left_to_crawl,
            links_scheduled: links,
            pages_scheduled: pages,
            visited,
            percent_complete,
        }
    }

    #[test]
    fn progress_line_matches_the_stable_format() {
        let progress = snapshot(50, 50, 3, 2, 50);
        assert_eq!(
            progress.to_string(),
            "50 crawled. 50 left to crawl. 3 scheduled for download. 2 scheduled for processing. 50.0% complete."
        );
    }

    #[test]
    fn fractional_percentages_keep_their_decimals() {
        let progress = snapshot(1, 2, 1, 0, 1);
        // 1 / 3 -> 33.33
        assert!(progress.to_string().ends_with("33.33% complete."));
    }

    #[test]
    fn left_to_crawl_may_go_negative_near_completion() {
        let progress = snapshot(4, -1, 0, 0, 4);
        // 4 / 3 -> 133.33; cosmetic, never used for scheduling.
        assert_eq!(
            progress.to_string(),
            "4 crawled. -1 left to crawl. 0 scheduled for download. 0 scheduled for processing. 133.33% complete."
        );
    }

    #[test]
    fn zero_work_prints_nan() {
        let progress = snapshot(0, 0, 0, 0, 0);
        assert!(progress.to_string().ends_with("NaN% complete."));
    }

    #[test]
    fn capture_reads_the_live_counters() {
        let state = CrawlState::new();
        state.record_link_scheduled();
        state.record_dispatch();
        let progress = CrawlProgress::capture(&state, 3, 2);
        assert_eq!(progress.links_scheduled, 1);
        assert_eq!(progress.visited, 1);
        assert_eq!(progress.left_to_crawl, 3 + 1 - 2);
    }

    #[test]
    fn json_export_contains_the_counters() {
        let progress = snapshot(1, 0, 0, 0, 1);
        let json = progress.to_json_string().unwrap();
        assert!(json.contains("\"actually_visited\":1"));
        assert!(json.contains("\"percent_complete\""));
    }
}
