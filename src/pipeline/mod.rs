//! Concurrent delete-marker removal pipeline.
//!
//! One sequential pagination driver feeds a bounded page queue consumed by N
//! marker-extraction workers; their identifiers flow over an unbounded queue
//! into M delete-batching workers. Termination is channel-closure based:
//! dropping the page sender after the last page is the "no more pages"
//! broadcast, and the identifier channel closes by itself once the last
//! extraction worker exits — that closure is the drain signal for every
//! batching worker. A completion channel then acts as the barrier the main
//! flow blocks on, one receipt per batching worker.

mod delete;
mod extract;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::config::{Configuration, RetryConfig};
use crate::store::{ObjectVersionId, PageCursor, StoreError, VersionPage, VersionStore};

pub use delete::DeleteBatch;

/// Pages buffered between the pagination driver and the extraction pool.
const PAGE_QUEUE_DEPTH: usize = 64;

/// Counters shared by the driver and both worker pools.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub pages_listed: AtomicU64,
    pub markers_found: AtomicU64,
    pub batches_submitted: AtomicU64,
    pub batches_failed: AtomicU64,
    pub markers_deleted: AtomicU64,
    pub markers_dropped: AtomicU64,
}

impl PipelineStats {
    fn snapshot(&self) -> UndeleteSummary {
        UndeleteSummary {
            pages_listed: self.pages_listed.load(Ordering::Relaxed),
            markers_found: self.markers_found.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            markers_deleted: self.markers_deleted.load(Ordering::Relaxed),
            markers_dropped: self.markers_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Final counts for one run. In dry-run mode `markers_deleted` counts the
/// markers that would have been deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndeleteSummary {
    pub pages_listed: u64,
    pub markers_found: u64,
    pub batches_submitted: u64,
    pub batches_failed: u64,
    pub markers_deleted: u64,
    pub markers_dropped: u64,
}

/// Explicitly constructed pipeline context: the injected store, pool sizes,
/// and retry policy. Nothing about a run lives in ambient process state.
pub struct UndeletePipeline {
    store: Arc<dyn VersionStore>,
    extraction_workers: usize,
    deletion_workers: usize,
    retry: RetryConfig,
    dry_run: bool,
    stats: Arc<PipelineStats>,
}

impl UndeletePipeline {
    pub fn new(store: Arc<dyn VersionStore>, config: &Configuration) -> Self {
        Self {
            store,
            extraction_workers: config.extraction_workers,
            deletion_workers: config.deletion_workers,
            retry: config.retry.clone(),
            dry_run: config.dry_run,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Returns an error only if a listing call fails; pagination is never
    /// partially retried. Failed delete batches surface as warnings and in
    /// the summary counters.
    pub async fn run(self) -> Result<UndeleteSummary, StoreError> {
        let (page_tx, page_rx) = mpsc::channel::<VersionPage>(PAGE_QUEUE_DEPTH);
        let (ident_tx, ident_rx) = mpsc::unbounded_channel::<ObjectVersionId>();
        let (done_tx, mut done_rx) = mpsc::channel::<()>(self.deletion_workers.max(1));

        let page_rx = Arc::new(Mutex::new(page_rx));
        let ident_rx = Arc::new(Mutex::new(ident_rx));

        let mut extractors = Vec::with_capacity(self.extraction_workers);
        for worker in 0..self.extraction_workers {
            debug!(
                "starting extraction worker {} of {}",
                worker + 1,
                self.extraction_workers
            );
            extractors.push(tokio::spawn(extract::run_extractor(
                worker,
                page_rx.clone(),
                ident_tx.clone(),
            )));
        }
        // Extraction workers now hold the only identifier senders; the
        // channel closes exactly when the last of them exits.
        drop(ident_tx);

        let mut deleters = Vec::with_capacity(self.deletion_workers);
        for worker in 0..self.deletion_workers {
            debug!(
                "starting deletion worker {} of {}",
                worker + 1,
                self.deletion_workers
            );
            deleters.push(tokio::spawn(delete::run_deleter(
                worker,
                ident_rx.clone(),
                self.store.clone(),
                self.retry.clone(),
                self.dry_run,
                self.stats.clone(),
                done_tx.clone(),
            )));
        }
        drop(done_tx);

        // Sequential pagination driver: only one enumeration may be in
        // flight. A listing failure aborts the whole run.
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = self.store.next_page(cursor.as_ref()).await?;
            self.stats.pages_listed.fetch_add(1, Ordering::Relaxed);
            self.stats
                .markers_found
                .fetch_add(page.delete_markers.len() as u64, Ordering::Relaxed);
            debug!(
                markers = page.delete_markers.len(),
                last = page.next.is_none(),
                "queueing listing page {}",
                self.stats.pages_listed.load(Ordering::Relaxed)
            );
            cursor = page.next.clone();
            if page_tx.send(page).await.is_err() {
                // Every extraction worker is gone; nothing can consume more.
                break;
            }
            if cursor.is_none() {
                break;
            }
        }
        // "No more pages": each extraction worker observes the closure once,
        // after the queue has drained.
        drop(page_tx);

        // Completion barrier: one receipt per deletion worker, sent after its
        // final partial batch has been flushed.
        let mut completed = 0usize;
        while done_rx.recv().await.is_some() {
            completed += 1;
            debug!(
                "deletion worker drained ({completed} of {})",
                self.deletion_workers
            );
        }
        if completed != self.deletion_workers {
            warn!(
                "only {completed} of {} deletion workers reported completion",
                self.deletion_workers
            );
        }

        futures::future::join_all(extractors).await;
        futures::future::join_all(deleters).await;

        Ok(self.stats.snapshot())
    }
}
