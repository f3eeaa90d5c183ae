//! # Parse Stage Module
//!
//! The CPU-bound worker pool.
//!
//! ## Overview
//!
//! The parse stage runs at half the width of the fetch stage: network
//! latency dominates download time while parsing burns CPU and allocates
//! heavily, so a parse backlog is made to translate into a fetch backlog and
//! from there into coordinator backpressure.
//!
//! Each [`ParseJob`] binds one downloaded page. Running it invokes every
//! registered action on the page, extracts outbound link candidates, and
//! returns them for the completion consumer to filter and enqueue. Actions
//! and extraction may fail; failures are logged and the job still completes
//! so the in-flight accounting drains.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use kanal::{unbounded_async, AsyncReceiver, AsyncSender};
use tokio::task::JoinSet;
use tracing::{error, trace, warn};

use crate::action::CrawlAction;
use crate::error::CrawlError;
use crate::extract::LinkExtractor;
use crate::fetch::poll;
use crate::page::Page;

/// One downloaded page awaiting processing, with its crawl context attached.
pub struct ParseJob {
    url: String,
    page: Page,
    actions: Arc<Vec<Box<dyn CrawlAction>>>,
    base_url: String,
    base_url_secure: Option<String>,
    extractor: Arc<dyn LinkExtractor>,
}

impl ParseJob {
    pub fn new(url: String, page: Page, extractor: Arc<dyn LinkExtractor>) -> Self {
        ParseJob {
            url,
            page,
            actions: Arc::new(Vec::new()),
            base_url: String::new(),
            base_url_secure: None,
            extractor,
        }
    }

    pub fn set_actions(&mut self, actions: Arc<Vec<Box<dyn CrawlAction>>>) {
        self.actions = actions;
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
    }

    pub fn set_base_url_secure(&mut self, base_url_secure: Option<String>) {
        self.base_url_secure = base_url_secure;
    }

    /// Runs every action on the page, then extracts outbound candidates.
    /// Candidates outside both base URLs are dropped here; the authoritative
    /// scope check happens when the completion consumer enqueues.
    pub async fn run(self) -> Vec<String> {
        for action in self.actions.iter() {
            if let Err(e) = action.on_page(&self.url, &self.page).await {
                warn!("action {} failed on {}: {e}", action.name(), self.url);
            }
        }

        let mut links = match self.extractor.extract_links(&self.page) {
            Ok(links) => links,
            Err(e) => {
                error!("link extraction failed on {}: {e}", self.url);
                return Vec::new();
            }
        };

        links.retain(|link| {
            link.starts_with(&self.base_url)
                || self
                    .base_url_secure
                    .as_deref()
                    .is_some_and(|base| link.starts_with(base))
        });
        trace!("{} in-scope candidates on {}", links.len(), self.url);
        links
    }
}

/// A pool of page-processing workers fed through a job channel.
pub struct ParseStage {
    job_tx: AsyncSender<ParseJob>,
    done_rx: AsyncReceiver<Vec<String>>,
    workers: JoinSet<()>,
}

impl ParseStage {
    pub fn new(worker_count: usize) -> Self {
        let (job_tx, job_rx) = unbounded_async::<ParseJob>();
        let (done_tx, done_rx) = unbounded_async::<Vec<String>>();

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            workers.spawn(async move {
                trace!("parse worker {worker} started");
                while let Ok(job) = job_rx.recv().await {
                    // A panicking action or extractor must not take the
                    // worker (and its in-flight accounting) down with it.
                    let links = AssertUnwindSafe(job.run())
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            error!("a parse job panicked, dropping its links");
                            Vec::new()
                        });
                    if done_tx.send(links).await.is_err() {
                        break;
                    }
                }
                trace!("parse worker {worker} finished");
            });
        }

        ParseStage {
            job_tx,
            done_rx,
            workers,
        }
    }

    /// Adds a parse job. Returns immediately; fails only when the stage has
    /// been shut down.
    pub async fn submit(&self, job: ParseJob) -> Result<(), CrawlError> {
        self.job_tx
            .send(job)
            .await
            .map_err(|_| CrawlError::PoolClosed)
    }

    pub(crate) fn job_sender(&self) -> AsyncSender<ParseJob> {
        self.job_tx.clone()
    }

    pub(crate) fn completions(&self) -> AsyncReceiver<Vec<String>> {
        self.done_rx.clone()
    }

    /// Takes the next completed link set in completion order, waiting up to
    /// `timeout`. Returns `None` on timeout.
    pub async fn poll_completed(&self, timeout: Duration) -> Option<Vec<String>> {
        poll(&self.done_rx, timeout).await
    }

    /// Closes the job channel (queued jobs are discarded) and waits up to
    /// `grace` for the workers to finish in-flight pages.
    pub(crate) async fn shutdown(mut self, grace: Duration) -> Result<(), CrawlError> {
        self.job_tx.close();
        drop(self.done_rx);
        let drained = tokio::time::timeout(grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("parse workers did not drain within {grace:?}, aborting them");
            self.workers.abort_all();
            return Err(CrawlError::ShutdownTimeout(grace));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HtmlLinkExtractor;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl CrawlAction for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_page(&self, url: &str, _page: &Page) -> Result<(), CrawlError> {
            self.seen.lock().push(url.to_owned());
            if self.fail {
                return Err(CrawlError::ParseFailed("recorder told to fail".into()));
            }
            Ok(())
        }
    }

    fn job_for(body: &str, actions: Arc<Vec<Box<dyn CrawlAction>>>) -> ParseJob {
        let page = Page::new("http://site/", "http://site/", 200, body);
        let mut job = ParseJob::new(
            "http://site/".to_owned(),
            page,
            Arc::new(HtmlLinkExtractor),
        );
        job.set_actions(actions);
        job.set_base_url("http://site");
        job.set_base_url_secure(Some("https://site".to_owned()));
        job
    }

    #[tokio::test]
    async fn run_invokes_actions_and_returns_in_scope_candidates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let actions: Arc<Vec<Box<dyn CrawlAction>>> = Arc::new(vec![Box::new(Recorder {
            seen: Arc::clone(&seen),
            fail: false,
        })]);
        let links = job_for(
            r##"<a href="/a.html">a</a> <a href="https://site/b.html">b</a> <a href="http://other/c.html">c</a>"##,
            actions,
        )
        .run()
        .await;
        assert_eq!(links, vec!["http://site/a.html", "https://site/b.html"]);
        assert_eq!(seen.lock().as_slice(), ["http://site/"]);
    }

    #[tokio::test]
    async fn failing_action_does_not_suppress_links() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let actions: Arc<Vec<Box<dyn CrawlAction>>> = Arc::new(vec![Box::new(Recorder {
            seen: Arc::clone(&seen),
            fail: true,
        })]);
        let links = job_for(r##"<a href="/a.html">a</a>"##, actions).run().await;
        assert_eq!(links, vec!["http://site/a.html"]);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn stage_processes_jobs_through_workers() {
        let stage = ParseStage::new(1);
        let job = job_for(r##"<a href="/a.html">a</a>"##, Arc::new(Vec::new()));
        stage.submit(job).await.unwrap();
        let links = stage
            .poll_completed(Duration::from_secs(1))
            .await
            .expect("completion");
        assert_eq!(links, vec!["http://site/a.html"]);
        stage.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
