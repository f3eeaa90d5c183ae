//! Module for tracking the operational state of the crawler.
//!
//! This module defines the `CrawlState` struct: the atomic counters that
//! decide when a crawl is complete, and the control flags that every task
//! re-checks on its five-second poll tick.
//!
//! The counters obey a strict ordering discipline: a queue insertion happens
//! before the matching counter increment, and a counter decrement happens
//! only after any follow-up job has been enqueued. The quiescence predicate
//! (`frontier empty && links_scheduled == 0 && pages_scheduled == 0`) can
//! therefore never observe a transient zero while work is still in flight.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counters and control flags for one crawler instance.
#[derive(Debug)]
pub struct CrawlState {
    /// Fetch jobs submitted but not yet drained from the fetch-completion
    /// channel. Signed: the drain side may momentarily run ahead of the
    /// submit side's increment.
    links_scheduled: AtomicI64,
    /// Parse jobs submitted but not yet drained from the parse-completion
    /// channel.
    pages_scheduled: AtomicI64,
    /// URLs dispatched to the fetch stage over the lifetime of this instance.
    visited_counter: AtomicUsize,
    /// Fetch completions consumed.
    actually_visited: AtomicUsize,

    /// Set while the coordinator is between taking a URL off the frontier
    /// and finishing its bookkeeping; a drain must not trust the counters
    /// while this is up.
    dispatching: AtomicBool,
    /// Cleared to tell every task to stop at its next poll tick.
    continue_processing: AtomicBool,
    /// Stops the coordinator from dispatching while consumers keep draining.
    force_pause: AtomicBool,
    /// Cleared to finish in-flight work without following new links.
    discover_urls: AtomicBool,
    /// Whether a `navigate()` call is currently in progress.
    running: AtomicBool,
}

impl CrawlState {
    pub fn new() -> Arc<Self> {
        Arc::new(CrawlState {
            links_scheduled: AtomicI64::new(0),
            pages_scheduled: AtomicI64::new(0),
            visited_counter: AtomicUsize::new(0),
            actually_visited: AtomicUsize::new(0),
            dispatching: AtomicBool::new(false),
            continue_processing: AtomicBool::new(true),
            force_pause: AtomicBool::new(false),
            discover_urls: AtomicBool::new(true),
            running: AtomicBool::new(false),
        })
    }

    pub fn links_scheduled(&self) -> i64 {
        self.links_scheduled.load(Ordering::SeqCst)
    }

    pub fn pages_scheduled(&self) -> i64 {
        self.pages_scheduled.load(Ordering::SeqCst)
    }

    pub fn visited_count(&self) -> usize {
        self.visited_counter.load(Ordering::SeqCst)
    }

    pub fn actually_visited_count(&self) -> usize {
        self.actually_visited.load(Ordering::SeqCst)
    }

    /// Records a fetch submission. Call after the job is on the fetch queue.
    pub(crate) fn record_link_scheduled(&self) {
        self.links_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a drained fetch completion. Call after the follow-up parse job
    /// (if any) has been enqueued.
    pub(crate) fn record_link_drained(&self) {
        self.links_scheduled.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records a parse submission. Call after the job is on the parse queue.
    pub(crate) fn record_page_scheduled(&self) {
        self.pages_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a drained parse completion. Call after the discovered links
    /// have been put onto the frontier.
    pub(crate) fn record_page_drained(&self) {
        self.pages_scheduled.fetch_sub(1, Ordering::SeqCst);
    }

    /// Records a URL dispatched to the fetch stage.
    pub(crate) fn record_dispatch(&self) {
        self.visited_counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a consumed fetch completion, successful or not.
    pub(crate) fn record_fetch_drained(&self) {
        self.actually_visited.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    pub(crate) fn set_dispatching(&self, value: bool) {
        self.dispatching.store(value, Ordering::SeqCst);
    }

    pub fn continue_processing(&self) -> bool {
        self.continue_processing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_continue_processing(&self, value: bool) {
        self.continue_processing.store(value, Ordering::SeqCst);
    }

    pub fn force_pause(&self) -> bool {
        self.force_pause.load(Ordering::SeqCst)
    }

    pub(crate) fn set_force_pause(&self, value: bool) {
        self.force_pause.store(value, Ordering::SeqCst);
    }

    pub fn discover_urls(&self) -> bool {
        self.discover_urls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_discover_urls(&self, value: bool) {
        self.discover_urls.store(value, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    /// Sets the running flag, returning the previous value.
    pub(crate) fn swap_running(&self, value: bool) -> bool {
        self.running.swap(value, Ordering::SeqCst)
    }

    /// True when no work is queued or in flight in either stage.
    pub fn is_quiescent(&self, frontier_len: usize) -> bool {
        frontier_len == 0 && self.links_scheduled() == 0 && self.pages_scheduled() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiescence_requires_all_three_zero() {
        let state = CrawlState::new();
        assert!(state.is_quiescent(0));

        state.record_link_scheduled();
        assert!(!state.is_quiescent(0));
        state.record_page_scheduled();
        state.record_link_drained();
        assert!(!state.is_quiescent(0));
        state.record_page_drained();
        assert!(state.is_quiescent(0));
        assert!(!state.is_quiescent(1));
    }

    #[test]
    fn drain_side_may_transiently_run_ahead() {
        let state = CrawlState::new();
        state.record_link_drained();
        assert_eq!(state.links_scheduled(), -1);
        state.record_link_scheduled();
        assert_eq!(state.links_scheduled(), 0);
    }

    #[test]
    fn dispatch_and_drain_counters_are_monotonic() {
        let state = CrawlState::new();
        state.record_dispatch();
        state.record_dispatch();
        state.record_fetch_drained();
        assert_eq!(state.visited_count(), 2);
        assert_eq!(state.actually_visited_count(), 1);
    }
}
