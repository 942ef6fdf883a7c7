use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::pipeline::PipelineStats;
use crate::store::{MAX_DELETE_BATCH, ObjectVersionId, VersionStore};

/// Accumulates identifiers up to the bulk-delete API limit. Each deletion
/// worker owns exactly one; there is no cross-worker batch sharing.
#[derive(Debug, Default)]
pub struct DeleteBatch {
    entries: Vec<ObjectVersionId>,
}

impl DeleteBatch {
    /// Append an identifier. Returns the accumulated entries once the batch
    /// reaches [`MAX_DELETE_BATCH`], leaving the accumulator empty.
    pub fn push(&mut self, id: ObjectVersionId) -> Option<Vec<ObjectVersionId>> {
        self.entries.push(id);
        if self.entries.len() >= MAX_DELETE_BATCH {
            Some(std::mem::take(&mut self.entries))
        } else {
            None
        }
    }

    /// Take whatever is pending, possibly nothing.
    pub fn drain(&mut self) -> Vec<ObjectVersionId> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One delete-batching worker.
///
/// Accumulates identifiers into a private batch and submits it whenever it
/// reaches the API limit. Closure of the identifier channel is the drain
/// signal: the final partial batch is flushed, then completion is reported
/// on `completed` before the worker exits.
pub(super) async fn run_deleter(
    worker: usize,
    identifiers: Arc<Mutex<mpsc::UnboundedReceiver<ObjectVersionId>>>,
    store: Arc<dyn VersionStore>,
    retry: RetryConfig,
    dry_run: bool,
    stats: Arc<PipelineStats>,
    completed: mpsc::Sender<()>,
) {
    let mut batch = DeleteBatch::default();
    loop {
        let id = { identifiers.lock().await.recv().await };
        match id {
            Some(id) => {
                if let Some(full) = batch.push(id) {
                    submit(worker, store.as_ref(), &retry, dry_run, &stats, full).await;
                }
            }
            None => {
                // Stream complete: flush the final partial batch.
                let rest = batch.drain();
                submit(worker, store.as_ref(), &retry, dry_run, &stats, rest).await;
                break;
            }
        }
    }
    debug!("deletion worker {worker} drained");
    let _ = completed.send(()).await;
}

/// Submit one batch, retrying per policy. An empty batch is a no-op and
/// never reaches the store. A batch that exhausts its retry budget is
/// dropped; its identifiers are not re-queued.
async fn submit(
    worker: usize,
    store: &dyn VersionStore,
    retry: &RetryConfig,
    dry_run: bool,
    stats: &PipelineStats,
    batch: Vec<ObjectVersionId>,
) {
    if batch.is_empty() {
        return;
    }

    if dry_run {
        info!(
            "dry-run: deletion worker {worker} would delete {} delete markers",
            batch.len()
        );
        stats.batches_submitted.fetch_add(1, Ordering::Relaxed);
        stats
            .markers_deleted
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        return;
    }

    let attempts = retry.max_retries + 1;
    for attempt in 1..=attempts {
        match store.delete_versions(&batch).await {
            Ok(()) => {
                debug!(
                    "deletion worker {worker} deleted batch of {}",
                    batch.len()
                );
                stats.batches_submitted.fetch_add(1, Ordering::Relaxed);
                stats
                    .markers_deleted
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(err) => {
                warn!(
                    "deletion worker {worker} failed to delete batch of {} (attempt {attempt} of {attempts}): {err}",
                    batch.len()
                );
                if attempt < attempts {
                    tokio::time::sleep(retry.backoff).await;
                }
            }
        }
    }

    warn!(
        "dropping {} delete markers after {attempts} failed attempts",
        batch.len()
    );
    stats.batches_failed.fetch_add(1, Ordering::Relaxed);
    stats
        .markers_dropped
        .fetch_add(batch.len() as u64, Ordering::Relaxed);
}
