use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::store::{ObjectVersionId, VersionPage};

/// One marker-extraction worker.
///
/// Pulls listing pages from the shared receiver and forwards every
/// delete-marker identifier onto the deletion queue. The identifier channel
/// is unbounded, so forwarding never blocks on a slow deletion pool. Exits
/// when the page channel closes, which happens only after the last page has
/// been queued and drained.
pub(super) async fn run_extractor(
    worker: usize,
    pages: Arc<Mutex<mpsc::Receiver<VersionPage>>>,
    identifiers: mpsc::UnboundedSender<ObjectVersionId>,
) {
    loop {
        let page = { pages.lock().await.recv().await };
        let Some(page) = page else {
            break;
        };
        for marker in page.delete_markers {
            if identifiers.send(marker).is_err() {
                // Deletion pool already shut down; nothing can consume more.
                debug!("extraction worker {worker} stopping, deletion pool is gone");
                return;
            }
        }
    }
    debug!("extraction worker {worker} finished");
}
