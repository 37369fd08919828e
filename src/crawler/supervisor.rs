//! Owner of the active crawlers, at most one per source id.
//!
//! Each started crawler runs on its own tokio task. The supervisor keeps a
//! halt flag and a progress channel per running source; the entry is removed
//! when the task ends, however it ends.

use super::{CrawlHooks, CrawlOptions, CrawlReport, SitemapCrawler};
use crate::error::CrawlError;
use crate::fetch::PageFetcher;
use crate::models::{CrawlProgress, Source};
use crate::store::Repository;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

struct Entry {
    halt: Arc<AtomicBool>,
    progress: watch::Receiver<CrawlProgress>,
}

type ActiveMap = Arc<Mutex<HashMap<String, Entry>>>;

fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, Entry>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs at most one crawler per source.
///
/// Clones share the same registry of active crawlers.
#[derive(Clone)]
pub struct Supervisor {
    repo: Repository,
    fetcher: Arc<dyn PageFetcher>,
    options: CrawlOptions,
    active: ActiveMap,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("options", &self.options)
            .field("active", &self.active_sources())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor with no active crawlers.
    ///
    /// # Arguments
    ///
    /// * `repo` - Store handed to every crawler
    /// * `fetcher` - Shared fetcher, usually a retrying HTTP fetcher
    /// * `options` - Crawl options applied to every source
    pub fn new(repo: Repository, fetcher: Arc<dyn PageFetcher>, options: CrawlOptions) -> Self {
        Self {
            repo,
            fetcher,
            options,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a crawler for `source`.
    ///
    /// Fails with [`CrawlError::AlreadyRunning`] while another crawler for
    /// the same source id is active.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub fn start(
        &self,
        source: Source,
        hooks: Arc<dyn CrawlHooks>,
    ) -> Result<CrawlHandle, CrawlError> {
        let source_id = source.id.clone();
        let halt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(CrawlProgress::idle(&source_id));

        {
            let mut active = lock(&self.active);
            if active.contains_key(&source_id) {
                warn!("Crawler already active for source");
                return Err(CrawlError::AlreadyRunning(source_id));
            }
            active.insert(
                source_id.clone(),
                Entry {
                    halt: halt.clone(),
                    progress: rx.clone(),
                },
            );
        }

        let guard = Deregister {
            active: self.active.clone(),
            source_id: source_id.clone(),
        };
        let hooks = Arc::new(SupervisedHooks {
            halt,
            progress: tx,
            inner: hooks,
        });
        let crawler = SitemapCrawler::new(
            source,
            self.repo.clone(),
            self.fetcher.clone(),
            self.options.clone(),
            hooks,
        );

        info!("Crawler started");
        let join = tokio::spawn(async move {
            let _guard = guard;
            crawler.run().await
        });

        Ok(CrawlHandle {
            source_id,
            progress: rx,
            join,
        })
    }

    /// Latest snapshot of an active crawler.
    pub fn status(&self, source_id: &str) -> Option<CrawlProgress> {
        lock(&self.active)
            .get(source_id)
            .map(|entry| entry.progress.borrow().clone())
    }

    /// Request a cooperative halt. Returns `false` if no crawler is active
    /// for the source.
    pub fn halt(&self, source_id: &str) -> bool {
        match lock(&self.active).get(source_id) {
            Some(entry) => {
                entry.halt.store(true, Ordering::SeqCst);
                info!(source_id, "Halt requested");
                true
            }
            None => false,
        }
    }

    /// Request a halt of every active crawler.
    ///
    /// # Returns
    ///
    /// The number of crawlers that were asked to stop.
    pub fn halt_all(&self) -> usize {
        let active = lock(&self.active);
        for entry in active.values() {
            entry.halt.store(true, Ordering::SeqCst);
        }
        info!(count = active.len(), "Halt requested for all crawlers");
        active.len()
    }

    /// Ids of sources with a running crawler, sorted.
    pub fn active_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Handle to a spawned crawler.
#[derive(Debug)]
pub struct CrawlHandle {
    source_id: String,
    progress: watch::Receiver<CrawlProgress>,
    join: JoinHandle<CrawlReport>,
}

impl CrawlHandle {
    /// Source this crawler runs for.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Progress channel; the last value survives the end of the crawl.
    pub fn progress(&self) -> watch::Receiver<CrawlProgress> {
        self.progress.clone()
    }

    /// Completion signal.
    pub async fn wait(self) -> Result<CrawlReport, CrawlError> {
        self.join.await.map_err(|e| CrawlError::Aborted {
            source_id: self.source_id,
            reason: e.to_string(),
        })
    }
}

struct Deregister {
    active: ActiveMap,
    source_id: String,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.source_id);
    }
}

struct SupervisedHooks {
    halt: Arc<AtomicBool>,
    progress: watch::Sender<CrawlProgress>,
    inner: Arc<dyn CrawlHooks>,
}

impl CrawlHooks for SupervisedHooks {
    fn on_update(&self, progress: &CrawlProgress) {
        self.progress.send_replace(progress.clone());
        self.inner.on_update(progress);
    }

    fn on_error(&self, error: &CrawlError) {
        self.inner.on_error(error);
    }

    fn should_halt(&self) -> bool {
        self.halt.load(Ordering::SeqCst) || self.inner.should_halt()
    }
}
