//! The two completion consumers that sit between the stages.
//!
//! Each consumer is a dedicated task draining one completion channel with a
//! five-second poll, re-checking the stop flag on every tick. The decrement
//! ordering is the load-bearing part: the fetch consumer decrements
//! `links_scheduled` only after the follow-up parse job is on the parse
//! queue, and the parse consumer decrements `pages_scheduled` only after the
//! discovered links are on the frontier. The coordinator's termination
//! predicate can therefore never observe a transient all-zero while work is
//! still flowing between the stages.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use kanal::{AsyncReceiver, AsyncSender};
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::action::CrawlAction;
use crate::extract::LinkExtractor;
use crate::fetch::FetchOutcome;
use crate::frontier::Frontier;
use crate::parse::ParseJob;
use crate::scope::ScopePolicy;
use crate::state::CrawlState;

use super::core::POLL_INTERVAL;

/// Takes one message off a completion channel, waiting at most one poll
/// interval. `None` covers both the timeout and the torn-down channel; the
/// latter sleeps a tick when the stop flag is still up, so the consumer
/// never spins.
async fn poll_tick<T>(rx: &AsyncReceiver<T>, state: &CrawlState) -> Option<T> {
    match tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) => {
            if state.continue_processing() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            None
        }
        Err(_) => None,
    }
}

/// Drains the fetch-completion channel: counts the visit, hands successful
/// downloads to the parse stage with the crawl context attached, and notifies
/// the actions about failed ones.
pub(crate) fn spawn_link_service_consumer(
    state: Arc<CrawlState>,
    scope: Arc<ScopePolicy>,
    actions: Arc<Vec<Box<dyn CrawlAction>>>,
    extractor: Arc<dyn LinkExtractor>,
    fetch_done: AsyncReceiver<FetchOutcome>,
    parse_jobs: AsyncSender<ParseJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        trace!("link service consumer started");
        while state.continue_processing() {
            let Some(outcome) = poll_tick(&fetch_done, &state).await else {
                continue;
            };

            state.record_fetch_drained();
            match outcome.result {
                Ok(page) => {
                    let mut job = ParseJob::new(outcome.url, page, Arc::clone(&extractor));
                    job.set_actions(Arc::clone(&actions));
                    job.set_base_url(scope.base_url());
                    job.set_base_url_secure(scope.base_url_secure().map(str::to_owned));

                    trace!("submitting a new parse job");
                    if parse_jobs.send(job).await.is_ok() {
                        state.record_page_scheduled();
                    } else {
                        error!("parse stage rejected a job, the pool is closed");
                    }
                }
                Err(e) => {
                    warn!("download failed for {}: {e}", outcome.url);
                    for action in actions.iter() {
                        let notified = AssertUnwindSafe(action.on_fetch_failure(&outcome.url, &e))
                            .catch_unwind()
                            .await;
                        match notified {
                            Ok(Ok(())) => {}
                            Ok(Err(action_err)) => warn!(
                                "action {} failed on fetch failure of {}: {action_err}",
                                action.name(),
                                outcome.url
                            ),
                            Err(_) => warn!(
                                "action {} panicked on fetch failure of {}",
                                action.name(),
                                outcome.url
                            ),
                        }
                    }
                }
            }
            // Decrement last, so the follow-up parse job is already visible.
            state.record_link_drained();
        }
        trace!("link service consumer finished");
    })
}

/// Drains the parse-completion channel: filters the discovered links through
/// the scope policy and the scheduled set, then enqueues the survivors.
pub(crate) fn spawn_page_service_consumer(
    state: Arc<CrawlState>,
    scope: Arc<ScopePolicy>,
    frontier: Arc<Frontier>,
    parse_done: AsyncReceiver<Vec<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        trace!("page service consumer started");
        while state.continue_processing() {
            let Some(links) = poll_tick(&parse_done, &state).await else {
                continue;
            };

            trace!("retrieved a collection of links of size: {}", links.len());
            for link in links {
                if scope.is_excluded(&link) {
                    trace!("NOT adding link since it is excluded: {link}");
                    continue;
                }
                if frontier.is_scheduled(&link) {
                    trace!("NOT adding link since it is already scheduled: {link}");
                    continue;
                }
                trace!("adding link to the list: {link}");
                frontier.put(link).await;
            }
            // Decrement last, so the new frontier entries are already visible.
            state.record_page_drained();
        }
        trace!("page service consumer finished");
    })
}
