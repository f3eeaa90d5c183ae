//! # Fetch Stage Module
//!
//! The network-bound worker pool.
//!
//! ## Overview
//!
//! The stage owns a fixed set of workers that pull URLs off a shared job
//! channel, check a client out of the pool, run the [`Fetcher`], and push a
//! [`FetchOutcome`] onto the completion channel, in completion order rather
//! than submission order. Submitting never blocks (the job channel is unbounded;
//! in-flight volume is capped upstream by the coordinator's backpressure) and
//! fails only once the stage has been shut down.
//!
//! Shutdown closes the job channel, discarding queued jobs, and gives the
//! workers a grace period to finish what they hold before aborting them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use kanal::{unbounded_async, AsyncReceiver, AsyncSender};
use tokio::task::JoinSet;
use tracing::{trace, warn};

use crate::client::ClientPool;
use crate::error::CrawlError;
use crate::fetcher::Fetcher;
use crate::page::Page;

/// The result of one fetch job, successful or not.
pub struct FetchOutcome {
    /// The URL the job was dispatched for.
    pub url: String,
    /// The downloaded page, or why the download failed.
    pub result: Result<Page, CrawlError>,
}

/// A pool of download workers fed through a job channel.
pub struct FetchStage {
    job_tx: AsyncSender<String>,
    done_rx: AsyncReceiver<FetchOutcome>,
    workers: JoinSet<()>,
}

impl FetchStage {
    pub fn new(worker_count: usize, clients: Arc<ClientPool>, fetcher: Arc<dyn Fetcher>) -> Self {
        let (job_tx, job_rx) = unbounded_async::<String>();
        let (done_tx, done_rx) = unbounded_async::<FetchOutcome>();

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let clients = Arc::clone(&clients);
            let fetcher = Arc::clone(&fetcher);
            workers.spawn(async move {
                trace!("fetch worker {worker} started");
                while let Ok(url) = job_rx.recv().await {
                    let result = match clients.acquire().await {
                        Ok(client) => {
                            // A panicking fetcher must not take the worker
                            // (and its in-flight accounting) down with it.
                            let result = AssertUnwindSafe(fetcher.fetch(&client, &url))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    Err(CrawlError::fetch_failed(url.as_str(), "fetcher panicked"))
                                });
                            clients.release(client);
                            result
                        }
                        Err(e) => Err(CrawlError::fetch_failed(
                            url.as_str(),
                            format!("client acquisition failed: {e}"),
                        )),
                    };
                    if done_tx.send(FetchOutcome { url, result }).await.is_err() {
                        break;
                    }
                }
                trace!("fetch worker {worker} finished");
            });
        }

        FetchStage {
            job_tx,
            done_rx,
            workers,
        }
    }

    /// Adds a fetch job. Returns immediately; fails only when the stage has
    /// been shut down.
    pub async fn submit(&self, url: String) -> Result<(), CrawlError> {
        self.job_tx
            .send(url)
            .await
            .map_err(|_| CrawlError::PoolClosed)
    }

    /// A sender handle for submitting jobs independently of the stage's
    /// lifetime.
    pub(crate) fn job_sender(&self) -> AsyncSender<String> {
        self.job_tx.clone()
    }

    /// A receiver handle onto the completion channel.
    pub(crate) fn completions(&self) -> AsyncReceiver<FetchOutcome> {
        self.done_rx.clone()
    }

    /// Takes the next completed fetch in completion order, waiting up to
    /// `timeout`. Returns `None` on timeout.
    pub async fn poll_completed(&self, timeout: Duration) -> Option<FetchOutcome> {
        poll(&self.done_rx, timeout).await
    }

    /// Closes the job channel (queued jobs are discarded) and waits up to
    /// `grace` for the workers to finish in-flight downloads.
    pub(crate) async fn shutdown(mut self, grace: Duration) -> Result<(), CrawlError> {
        self.job_tx.close();
        drop(self.done_rx);
        let drained = tokio::time::timeout(grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("fetch workers did not drain within {grace:?}, aborting them");
            self.workers.abort_all();
            return Err(CrawlError::ShutdownTimeout(grace));
        }
        Ok(())
    }
}

/// Timed poll on a completion channel: `None` on timeout or teardown.
pub(crate) async fn poll<T>(rx: &AsyncReceiver<T>, timeout: Duration) -> Option<T> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Ok(value)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use async_trait::async_trait;

    struct EchoFetcher;

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, _client: &crate::client::PooledClient, url: &str) -> Result<Page, CrawlError> {
            if url.ends_with("/fail") {
                return Err(CrawlError::fetch_failed(url, "nope"));
            }
            Ok(Page::new(url, url, 200, "<html></html>"))
        }
    }

    fn stage(workers: usize) -> FetchStage {
        let clients = Arc::new(ClientPool::new(workers, &ClientConfig::default()).unwrap());
        FetchStage::new(workers, clients, Arc::new(EchoFetcher))
    }

    #[tokio::test]
    async fn completions_arrive_for_submitted_jobs() {
        let stage = stage(2);
        stage.submit("http://site/a".to_owned()).await.unwrap();
        stage.submit("http://site/fail".to_owned()).await.unwrap();

        let mut ok = 0;
        let mut failed = 0;
        for _ in 0..2 {
            let outcome = stage
                .poll_completed(Duration::from_secs(1))
                .await
                .expect("completion");
            match outcome.result {
                Ok(page) => {
                    assert_eq!(page.status, 200);
                    ok += 1;
                }
                Err(_) => failed += 1,
            }
        }
        assert_eq!((ok, failed), (1, 1));
        stage.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn poll_times_out_when_nothing_completes() {
        let stage = stage(1);
        assert!(stage.poll_completed(Duration::from_millis(20)).await.is_none());
        stage.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn submit_fails_after_shutdown() {
        let stage = stage(1);
        let sender = stage.job_sender();
        stage.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(sender.send("http://site/".to_owned()).await.is_err());
    }
}
