//! The central hub and referee between the network-bound fetch stage and the
//! CPU-bound parse stage.
//!
//! `SiteCrawler` owns the scope policy, the frontier, the counters, and the
//! two worker pools, and runs the coordinator loop on the caller's task. The
//! coordinator pulls the next URL off the frontier, enforces backpressure and
//! the short-circuit bound, and dispatches to the fetch stage; the two
//! completion consumers move finished work between the stages and feed
//! discovered links back into the frontier. The crawl is over exactly when
//! the frontier is empty and both in-flight counters have drained to zero.
//!
//! Every wait in the system is a timed five-second poll that re-checks the
//! stop flag, so no component blocks indefinitely and a shutdown request is
//! observed within one tick everywhere.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::action::CrawlAction;
use crate::client::{ClientConfig, ClientPool, Cookie};
use crate::error::CrawlError;
use crate::extract::{HtmlLinkExtractor, LinkExtractor};
use crate::fetch::FetchStage;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::frontier::Frontier;
use crate::parse::ParseStage;
use crate::scope::ScopePolicy;
use crate::state::CrawlState;
use crate::stats::CrawlProgress;

use super::consumers::{spawn_link_service_consumer, spawn_page_service_consumer};

/// Every wait in the crawler is a timed poll of this length, so the stop
/// flag is observed within one tick by every task.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long each worker pool gets to drain on shutdown before being aborted.
const POOL_TERMINATION_GRACE: Duration = Duration::from_secs(120);

/// Parse workers per fetch worker. A design constant, not a tuning knob:
/// changing it changes the backpressure characteristic materially.
const DOWNLOAD_VS_PROCESS_RATIO: f64 = 0.5;

/// How many visits between progress log lines.
const REPORT_PROGRESS_PER_DOWNLOADED_PAGES: usize = 2000;

/// How often a pause re-checks that the coordinator has left its dispatch
/// section.
const DISPATCH_SETTLE: Duration = Duration::from_millis(50);

/// The two worker pools plus their client pool, created together and torn
/// down together.
struct Pools {
    fetch: FetchStage,
    parse: ParseStage,
    clients: Arc<ClientPool>,
}

struct Consumers {
    link: JoinHandle<()>,
    page: JoinHandle<()>,
}

/// A polite, bounded-memory site crawler.
///
/// Configure it, then call [`navigate`](SiteCrawler::navigate), which blocks
/// until the crawl reaches quiescence. All control methods take `&self`, so
/// the instance can be shared behind an [`Arc`] and paused, resumed, or shut
/// down from another task while `navigate` runs.
pub struct SiteCrawler {
    scope: Arc<ScopePolicy>,
    frontier: Arc<Frontier>,
    state: Arc<CrawlState>,
    actions: Arc<Vec<Box<dyn CrawlAction>>>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn LinkExtractor>,

    /// Fetch workers (and pooled clients). Defaults to the CPU count.
    thread_limit: AtomicUsize,
    /// Dispatch pauses while more downloads than this are in flight.
    max_process_waiting: AtomicUsize,
    /// Stop after this many dispatches; 0 disables.
    short_circuit_after: AtomicUsize,
    /// Last visit count a progress line was printed for.
    visit_logged: AtomicI64,

    disable_redirects: AtomicBool,
    enable_javascript: AtomicBool,
    cookies: Mutex<Vec<Cookie>>,

    pools: Mutex<Option<Pools>>,
    consumers: Mutex<Option<Consumers>>,
}

impl SiteCrawler {
    /// Sets up the crawler for a site.
    ///
    /// `base_url` starts with the protocol and does not end with a `/` (so:
    /// `"http://www.site.com"`); `base_url_secure` is its https sibling, if
    /// any. The actions are called for every page that finishes downloading,
    /// successfully or not.
    pub fn new(
        base_url: impl Into<String>,
        base_url_secure: Option<String>,
        actions: Vec<Box<dyn CrawlAction>>,
    ) -> Result<Self, CrawlError> {
        let scope = ScopePolicy::new(base_url, base_url_secure)?;
        Ok(SiteCrawler {
            scope: Arc::new(scope),
            frontier: Arc::new(Frontier::new()),
            state: CrawlState::new(),
            actions: Arc::new(actions),
            fetcher: Arc::new(HttpFetcher),
            extractor: Arc::new(HtmlLinkExtractor),
            thread_limit: AtomicUsize::new(num_cpus::get()),
            max_process_waiting: AtomicUsize::new(2000),
            short_circuit_after: AtomicUsize::new(0),
            visit_logged: AtomicI64::new(-1),
            disable_redirects: AtomicBool::new(false),
            enable_javascript: AtomicBool::new(false),
            cookies: Mutex::new(Vec::new()),
            pools: Mutex::new(None),
            consumers: Mutex::new(None),
        })
    }

    // ---- configuration ----------------------------------------------------

    /// Sets the number of fetch workers (the parse stage follows at half the
    /// width). Calling this while the crawler is running causes a reset: the
    /// pools are drained and recreated while the visited set, the blocked
    /// patterns and the frontier are retained.
    pub async fn set_thread_limit(&self, thread_limit: usize) -> Result<(), CrawlError> {
        if thread_limit < 1 {
            return Err(CrawlError::Config(
                "cannot have less than 1 worker".into(),
            ));
        }
        self.thread_limit.store(thread_limit, Ordering::SeqCst);

        if self.state.running() {
            self.reset().await?;
        }
        Ok(())
    }

    pub fn thread_limit(&self) -> usize {
        self.thread_limit.load(Ordering::SeqCst)
    }

    /// Caps the number of in-flight downloads before the coordinator pauses
    /// to let the consumers catch up.
    pub fn set_max_process_waiting(&self, max_process_waiting: usize) -> Result<(), CrawlError> {
        if max_process_waiting < 1 {
            return Err(CrawlError::Config(
                "max process waiting cannot be less than 1".into(),
            ));
        }
        self.max_process_waiting
            .store(max_process_waiting, Ordering::SeqCst);
        Ok(())
    }

    pub fn max_process_waiting(&self) -> usize {
        self.max_process_waiting.load(Ordering::SeqCst)
    }

    /// Stops all navigation after this many dispatches, basically a way to
    /// say "stop after X visits". Handy for debugging; 0 (the default)
    /// disables it.
    pub fn set_short_circuit_after(&self, short_circuit_after: usize) {
        self.short_circuit_after
            .store(short_circuit_after, Ordering::SeqCst);
    }

    pub fn short_circuit_after(&self) -> usize {
        self.short_circuit_after.load(Ordering::SeqCst)
    }

    /// Seeds the frontier with extra starting points, skipping anything
    /// excluded or already scheduled.
    pub async fn set_include_path<I>(&self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        debug!(
            "setting include path (currently scheduled: {})",
            self.frontier.len()
        );
        for path in paths {
            let promoted = self.scope.prepend_base_url_if_needed(&path);
            if !self.scope.is_excluded(&promoted) && !self.frontier.is_scheduled(&path) {
                self.frontier.put(path).await;
            }
        }
        debug!(
            "done setting include path, currently scheduled: {}",
            self.frontier.len()
        );
    }

    /// Adds substring patterns that must never be crawled.
    pub fn set_blocked<I>(&self, blocked: I)
    where
        I: IntoIterator<Item = String>,
    {
        for pattern in blocked {
            self.scope.add_blocked(pattern);
        }
    }

    /// The live collection of path suffixes considered parsable pages.
    /// Feel free to manipulate, but not after starting the crawler.
    pub fn allowed_suffixes(&self) -> MutexGuard<'_, Vec<String>> {
        self.scope.allowed_suffixes()
    }

    /// Enables redirect-following for all clients in the pool.
    pub fn enable_redirects(&self) {
        self.disable_redirects.store(false, Ordering::SeqCst);
    }

    /// Disables redirect-following for all clients in the pool.
    pub fn disable_redirects(&self) {
        self.disable_redirects.store(true, Ordering::SeqCst);
    }

    /// Marks the pool as javascript-enabled. Advisory: only fetchers that
    /// can render scripts honor it.
    pub fn enable_java_script(&self) {
        self.enable_javascript.store(true, Ordering::SeqCst);
    }

    /// Adds a cookie for all clients in the pool. Takes effect when the pool
    /// is (re)created.
    pub fn add_cookie(&self, cookie: Cookie) {
        self.cookies.lock().push(cookie);
    }

    /// Removes all cookies, from the configuration and from the live pool.
    /// Returns false if there is no pool (yet?).
    pub fn clear_cookies(&self) -> bool {
        self.cookies.lock().clear();
        let pools = self.pools.lock();
        match pools.as_ref() {
            Some(pools) => {
                pools.clients.clear_cookies();
                true
            }
            None => false,
        }
    }

    /// Tells the crawler to stop finding new URLs: in-flight work finishes,
    /// nothing new is dispatched.
    pub fn disable_crawling(&self) {
        self.state.set_discover_urls(false);
    }

    /// Replaces the downloader. Call before `navigate`.
    pub fn set_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetcher = fetcher;
    }

    /// Replaces the link extractor. Call before `navigate`.
    pub fn set_link_extractor(&mut self, extractor: Arc<dyn LinkExtractor>) {
        self.extractor = extractor;
    }

    // ---- introspection ----------------------------------------------------

    pub fn visited_count(&self) -> usize {
        self.state.visited_count()
    }

    pub fn actually_visited_count(&self) -> usize {
        self.state.actually_visited_count()
    }

    pub fn links_scheduled(&self) -> i64 {
        self.state.links_scheduled()
    }

    pub fn pages_scheduled(&self) -> i64 {
        self.state.pages_scheduled()
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn is_running(&self) -> bool {
        self.state.running()
    }

    /// A snapshot of the crawl counters.
    pub fn progress(&self) -> CrawlProgress {
        CrawlProgress::capture(&self.state, self.frontier.len(), self.thread_limit())
    }

    /// A user-friendly one-line progress message.
    pub fn get_crawl_progress(&self) -> String {
        self.progress().to_string()
    }

    // ---- lifecycle --------------------------------------------------------

    /// Stops the coordinator from dispatching new pages. The consumers keep
    /// draining in-flight work.
    pub fn pause(&self) {
        self.state.set_force_pause(true);
    }

    /// Resumes dispatching.
    pub fn unpause(&self) {
        self.state.set_force_pause(false);
    }

    /// Pauses, waits for both in-flight counters to drain to zero, then
    /// shuts the pools down. The visited set, the blocked patterns and the
    /// frontier are retained.
    pub async fn hard_pause(&self) {
        self.pause();
        // A coordinator iteration that slipped past the pause check may
        // still be mid-dispatch; the counters cannot be trusted until its
        // bookkeeping lands.
        while self.state.dispatching() {
            tokio::time::sleep(DISPATCH_SETTLE).await;
        }
        self.wait_for_link_service_consumer().await;
        self.wait_for_page_service_consumer().await;
        self.shutdown().await;
    }

    /// Recreates the pools and the consumers, then resumes dispatching.
    pub async fn hard_unpause(&self) -> Result<(), CrawlError> {
        self.state.set_continue_processing(true);
        self.init()?;
        self.start_consumers();
        self.unpause();
        Ok(())
    }

    /// A `hard_pause` followed by a `hard_unpause`.
    async fn reset(&self) -> Result<(), CrawlError> {
        self.hard_pause().await;
        self.hard_unpause().await
    }

    /// Runs the crawl to completion.
    ///
    /// Call after all setup is done; avoid changing parameters while this is
    /// in flight. Blocks until the frontier is empty and every scheduled
    /// download and page has been processed, then drains and shuts down.
    pub async fn navigate(&self) -> Result<(), CrawlError> {
        info!(
            "starting crawl with {} queued endpoints and {} plugins",
            self.frontier.len(),
            self.actions.len()
        );
        if self.state.swap_running(true) {
            return Err(CrawlError::Config("crawler is already running".into()));
        }
        self.state.set_continue_processing(true);

        if let Err(e) = self.init() {
            self.state.set_running(false);
            return Err(e);
        }

        if self.frontier.is_empty() {
            self.frontier.put(self.scope.base_url().to_owned()).await;
        }

        self.start_consumers();
        self.run_coordinator().await;

        self.wait_for_link_service_consumer().await;
        self.wait_for_page_service_consumer().await;
        self.shutdown().await;
        self.state.set_running(false);
        Ok(())
    }

    /// Stops every task and tears the pools down: raises the stop flag,
    /// gives each worker pool a two-minute grace to drain, closes the client
    /// pool, and joins both consumer tasks.
    pub async fn shutdown(&self) {
        // With the flag down the consumers stop cleanly at their next tick,
        // which lets the pool drains below finish quickly.
        self.state.set_continue_processing(false);

        let pools = self.pools.lock().take();
        if let Some(pools) = pools {
            if let Err(e) = pools.fetch.shutdown(POOL_TERMINATION_GRACE).await {
                error!("something happened while waiting for the fetch stage to shut down: {e}");
            }
            if let Err(e) = pools.parse.shutdown(POOL_TERMINATION_GRACE).await {
                error!("something happened while waiting for the parse stage to shut down: {e}");
            }
            pools.clients.close();
        }

        let consumers = self.consumers.lock().take();
        if let Some(consumers) = consumers {
            join_consumer("link service consumer", consumers.link).await;
            join_consumer("page service consumer", consumers.page).await;
        }
    }

    // ---- internals --------------------------------------------------------

    /// Creates (or recreates) the client pool and both worker pools from the
    /// current configuration.
    fn init(&self) -> Result<(), CrawlError> {
        if let Some(old) = self.pools.lock().take() {
            old.clients.close();
        }

        let thread_limit = self.thread_limit();
        let config = ClientConfig {
            disable_redirects: self.disable_redirects.load(Ordering::SeqCst),
            enable_javascript: self.enable_javascript.load(Ordering::SeqCst),
            cookies: self.cookies.lock().clone(),
        };
        let clients = Arc::new(ClientPool::new(thread_limit, &config)?);
        clients.set_name("sitecrawler pool");

        let fetch = FetchStage::new(thread_limit, Arc::clone(&clients), Arc::clone(&self.fetcher));
        let parse_workers = (thread_limit as f64 * DOWNLOAD_VS_PROCESS_RATIO).ceil() as usize;
        let parse = ParseStage::new(parse_workers);

        info!(
            "client pool {} created with size {}, fetch stage with {} workers, parse stage with {} workers",
            clients.name(),
            thread_limit,
            thread_limit,
            parse_workers
        );

        *self.pools.lock() = Some(Pools {
            fetch,
            parse,
            clients,
        });
        Ok(())
    }

    fn start_consumers(&self) {
        let (fetch_done, parse_jobs, parse_done) = {
            let pools = self.pools.lock();
            let Some(pools) = pools.as_ref() else {
                error!("cannot start consumers without pools");
                return;
            };
            (
                pools.fetch.completions(),
                pools.parse.job_sender(),
                pools.parse.completions(),
            )
        };

        let link = spawn_link_service_consumer(
            Arc::clone(&self.state),
            Arc::clone(&self.scope),
            Arc::clone(&self.actions),
            Arc::clone(&self.extractor),
            fetch_done,
            parse_jobs,
        );
        let page = spawn_page_service_consumer(
            Arc::clone(&self.state),
            Arc::clone(&self.scope),
            Arc::clone(&self.frontier),
            parse_done,
        );
        *self.consumers.lock() = Some(Consumers { link, page });
    }

    /// The producer loop. Runs on the caller's task and returns as soon as
    /// there is nothing left to crawl or a stop condition fires.
    async fn run_coordinator(&self) {
        while self.should_continue_crawling() {
            self.update_crawl_progress();

            if self.should_pause_crawling() {
                debug!("analyzing pages (pausing crawling to let the consumers catch up)");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            // Raise the dispatch marker before re-reading the pause flag:
            // whoever sets the flag afterwards is guaranteed to see the
            // marker and wait for this iteration's bookkeeping.
            self.state.set_dispatching(true);
            if self.state.force_pause() {
                self.state.set_dispatching(false);
                continue;
            }

            // Cannot be an unbounded take: that might block forever.
            let Some(queued) = self.frontier.poll(POLL_INTERVAL).await else {
                self.state.set_dispatching(false);
                continue;
            };
            let url = self.scope.prepend_base_url_if_needed(&queued);

            // What if this URL has been excluded? We simply skip over it.
            if self.scope.is_excluded(&url) {
                trace!("this url is excluded: {url}");
                self.frontier.mark_off(&queued);
                self.state.set_dispatching(false);
                continue;
            }

            let submitted = {
                let job_tx = self.pools.lock().as_ref().map(|p| p.fetch.job_sender());
                match job_tx {
                    Some(tx) => tx.send(url.clone()).await.is_ok(),
                    None => false,
                }
            };
            if !submitted {
                // Mid-reset the pools are briefly gone; keep the URL. If the
                // crawler is stopping for good, give up instead of spinning.
                self.frontier.requeue(queued).await;
                self.state.set_dispatching(false);
                if !self.state.force_pause() && !self.state.continue_processing() {
                    warn!("fetch stage is closed and the crawler is stopping, exiting the crawl loop");
                    return;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            self.state.record_link_scheduled();
            self.scope.mark_visited(&url);
            self.state.record_dispatch();
            self.frontier.mark_off(&queued);
            self.state.set_dispatching(false);
        }

        info!(
            "done crawling, {} links visited (crosscheck: {})",
            self.state.visited_count(),
            self.state.actually_visited_count()
        );
    }

    /// True while there is work queued or in flight and no stop condition
    /// has fired.
    fn should_continue_crawling(&self) -> bool {
        let more_pages_to_visit = self.frontier.len() > 0
            || self.state.links_scheduled() > 0
            || self.state.pages_scheduled() > 0;
        if !more_pages_to_visit {
            info!("no more pages to visit, all pages processed, stopping this crawl");
            return false;
        }

        if !self.state.discover_urls() {
            info!("url discovery was disabled, stopping this crawl");
            return false;
        }

        let short_circuit_after = self.short_circuit_after();
        trace!(
            "current short-circuit setting: {}, visited counter: {}",
            short_circuit_after,
            self.state.visited_count()
        );
        if short_circuit_after != 0 && self.state.visited_count() > short_circuit_after {
            info!(
                "a short-circuit was set (at {}) and has been triggered after {} visited pages, stopping this crawl",
                short_circuit_after,
                self.state.visited_count()
            );
            warn!(
                "if you see a short-circuit message (this one) in a production environment/build, \
                 it is likely that somebody forgot to remove a debug set_short_circuit_after call"
            );
            return false;
        }

        true
    }

    /// True while too many downloads are in flight, or a pause was forced.
    fn should_pause_crawling(&self) -> bool {
        self.state.links_scheduled() > self.max_process_waiting() as i64
            || self.state.force_pause()
    }

    /// Logs a progress line every couple of thousand visits, at most once
    /// per count.
    fn update_crawl_progress(&self) {
        let visited = self.state.visited_count();
        if visited % REPORT_PROGRESS_PER_DOWNLOADED_PAGES == 0
            && visited as i64 > self.visit_logged.load(Ordering::SeqCst)
        {
            info!("{}", self.get_crawl_progress());
            self.visit_logged.store(visited as i64, Ordering::SeqCst);
        }
    }

    /// Waits for every scheduled download to be consumed.
    async fn wait_for_link_service_consumer(&self) {
        info!("draining the link service consumer");
        while self.state.links_scheduled() > 0 {
            info!(
                "waiting for {} links to be consumed...",
                self.state.links_scheduled()
            );
            if !self.state.continue_processing() {
                warn!("the link service consumer has been told to stop waiting");
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for every scheduled page to be processed.
    async fn wait_for_page_service_consumer(&self) {
        info!("draining the page service consumer");
        while self.state.pages_scheduled() > 0 {
            info!(
                "waiting for {} pages to be consumed...",
                self.state.pages_scheduled()
            );
            if !self.state.continue_processing() {
                warn!("the page service consumer has been told to stop waiting");
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

async fn join_consumer(name: &str, handle: JoinHandle<()>) {
    let mut handle = handle;
    loop {
        match tokio::time::timeout(POLL_INTERVAL, &mut handle).await {
            Ok(_) => {
                info!("... the {name} task is finished");
                break;
            }
            Err(_) => info!("waiting for the {name} task to finish..."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler() -> SiteCrawler {
        SiteCrawler::new("http://site", None, Vec::new()).unwrap()
    }

    #[test]
    fn empty_base_url_is_a_config_error() {
        assert!(matches!(
            SiteCrawler::new("", None, Vec::new()),
            Err(CrawlError::Config(_))
        ));
    }

    #[tokio::test]
    async fn thread_limit_below_one_is_rejected() {
        let crawler = crawler();
        assert!(matches!(
            crawler.set_thread_limit(0).await,
            Err(CrawlError::Config(_))
        ));
        crawler.set_thread_limit(3).await.unwrap();
        assert_eq!(crawler.thread_limit(), 3);
    }

    #[test]
    fn max_process_waiting_below_one_is_rejected() {
        let crawler = crawler();
        assert!(matches!(
            crawler.set_max_process_waiting(0),
            Err(CrawlError::Config(_))
        ));
        crawler.set_max_process_waiting(1).unwrap();
        assert_eq!(crawler.max_process_waiting(), 1);
    }

    #[tokio::test]
    async fn include_path_filters_excluded_and_scheduled() {
        let crawler = crawler();
        crawler.set_blocked(["/private".to_owned()]);
        crawler
            .set_include_path([
                "/a.html".to_owned(),
                "/a.html".to_owned(),
                "/private/x.html".to_owned(),
                "http://other/y.html".to_owned(),
            ])
            .await;
        assert_eq!(crawler.frontier_len(), 1);
    }

    #[test]
    fn clear_cookies_reports_pool_presence() {
        let crawler = crawler();
        crawler.add_cookie(Cookie::new("a", "1", "site"));
        assert!(!crawler.clear_cookies());
    }

    #[test]
    fn default_allowed_suffixes_are_live() {
        let crawler = crawler();
        assert_eq!(
            crawler.allowed_suffixes().as_slice(),
            ["/", ".jsp", ".htm", ".html"]
        );
        crawler.allowed_suffixes().push(".xml".to_owned());
        assert_eq!(crawler.allowed_suffixes().len(), 5);
    }
}
