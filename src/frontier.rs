//! # Frontier Module
//!
//! The queue of URLs awaiting download.
//!
//! ## Overview
//!
//! The frontier is intentionally unbounded: bounding it would risk deadlock
//! when the parse-completion consumer needs to enqueue freshly discovered
//! links. Memory is bounded upstream instead, by the coordinator pausing
//! dispatch while too many downloads are in flight.
//!
//! A `DashSet` mirror of the queued URLs answers `is_scheduled` membership
//! checks and atomically deduplicates concurrent `put`s. An entry stays in
//! the mirror from `put` until the coordinator has either dispatched the URL
//! (at which point it is in the visited set) or rejected it, so a URL is
//! always findable in "scheduled" or "visited" while it is live.

use std::time::Duration;

use dashmap::DashSet;
use kanal::{unbounded_async, AsyncReceiver, AsyncSender};

/// First-in/first-out queue of URLs awaiting download, with a concurrent
/// membership mirror.
pub struct Frontier {
    queue_tx: AsyncSender<String>,
    queue_rx: AsyncReceiver<String>,
    scheduled: DashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = unbounded_async();
        Frontier {
            queue_tx,
            queue_rx,
            scheduled: DashSet::new(),
        }
    }

    /// Number of URLs currently queued.
    pub fn len(&self) -> usize {
        self.queue_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the URL is already on the queue (or being dispatched).
    pub fn is_scheduled(&self, url: &str) -> bool {
        self.scheduled.contains(url)
    }

    /// Enqueues a URL unless it is already scheduled. Returns whether it was
    /// added.
    pub async fn put(&self, url: String) -> bool {
        if !self.scheduled.insert(url.clone()) {
            return false;
        }
        if self.queue_tx.send(url.clone()).await.is_err() {
            // The channel lives as long as the frontier, so this cannot
            // happen outside teardown; undo the marker rather than leak it.
            self.scheduled.remove(&url);
            return false;
        }
        true
    }

    /// Puts a polled-but-undispatched URL back on the queue. The scheduled
    /// marker is still in place, so this bypasses the dedup check.
    pub async fn requeue(&self, url: String) {
        let _ = self.queue_tx.send(url).await;
    }

    /// Takes the next URL, waiting up to `timeout`. Returns `None` on
    /// timeout.
    pub async fn poll(&self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.queue_rx.recv()).await {
            Ok(Ok(url)) => Some(url),
            _ => None,
        }
    }

    /// Clears the scheduled marker once the URL has been dispatched (and is
    /// in the visited set) or rejected by the scope filter.
    pub fn mark_off(&self, url: &str) {
        self.scheduled.remove(url);
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn put_deduplicates_queued_urls() {
        let frontier = Frontier::new();
        assert!(frontier.put("http://site/a".to_owned()).await);
        assert!(!frontier.put("http://site/a".to_owned()).await);
        assert_eq!(frontier.len(), 1);
        assert!(frontier.is_scheduled("http://site/a"));
    }

    #[tokio::test]
    async fn poll_returns_fifo_and_times_out_when_empty() {
        let frontier = Frontier::new();
        frontier.put("one".to_owned()).await;
        frontier.put("two".to_owned()).await;
        assert_eq!(frontier.poll(SHORT).await.as_deref(), Some("one"));
        assert_eq!(frontier.poll(SHORT).await.as_deref(), Some("two"));
        assert_eq!(frontier.poll(SHORT).await, None);
    }

    #[tokio::test]
    async fn marker_survives_poll_until_marked_off() {
        let frontier = Frontier::new();
        frontier.put("url".to_owned()).await;
        let polled = frontier.poll(SHORT).await.unwrap();
        assert!(frontier.is_scheduled(&polled));
        frontier.mark_off(&polled);
        assert!(!frontier.is_scheduled(&polled));
        // Once marked off, the URL may be scheduled again.
        assert!(frontier.put(polled).await);
    }

    #[tokio::test]
    async fn requeue_bypasses_the_dedup_check() {
        let frontier = Frontier::new();
        frontier.put("url".to_owned()).await;
        let polled = frontier.poll(SHORT).await.unwrap();
        frontier.requeue(polled).await;
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier.poll(SHORT).await.as_deref(), Some("url"));
    }
}
