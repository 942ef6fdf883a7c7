//! End-to-end pipeline tests driven against a scripted in-memory version
//! store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use s3_undelete::config::Configuration;
use s3_undelete::pipeline::UndeletePipeline;
use s3_undelete::store::{
    MAX_DELETE_BATCH, ObjectVersionId, PageCursor, StoreError, VersionPage, VersionStore,
};

/// Serves scripted pages in listing order and records every delete batch.
/// The first `fail_deletes` delete calls fail, for retry and drop tests.
#[derive(Debug, Default)]
struct FakeVersionStore {
    pages: Vec<Vec<ObjectVersionId>>,
    fail_deletes: AtomicU32,
    delete_calls: AtomicU32,
    batches: Mutex<Vec<Vec<ObjectVersionId>>>,
}

impl FakeVersionStore {
    fn with_pages(pages: Vec<Vec<ObjectVersionId>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    fn failing_first(pages: Vec<Vec<ObjectVersionId>>, fail_deletes: u32) -> Self {
        Self {
            pages,
            fail_deletes: AtomicU32::new(fail_deletes),
            ..Default::default()
        }
    }

    fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    async fn recorded_batches(&self) -> Vec<Vec<ObjectVersionId>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl VersionStore for FakeVersionStore {
    async fn next_page(&self, cursor: Option<&PageCursor>) -> Result<VersionPage, StoreError> {
        let index: usize = cursor
            .and_then(|cursor| cursor.key_marker.as_deref())
            .map(|marker| marker.parse().expect("fake cursor is a page index"))
            .unwrap_or(0);

        let delete_markers = self.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < self.pages.len()).then(|| PageCursor {
            key_marker: Some((index + 1).to_string()),
            version_id_marker: None,
        });

        Ok(VersionPage {
            delete_markers,
            next,
        })
    }

    async fn delete_versions(&self, batch: &[ObjectVersionId]) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let inject_failure = self
            .fail_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if inject_failure {
            return Err(StoreError::Delete("injected failure".to_string()));
        }

        self.batches.lock().await.push(batch.to_vec());
        Ok(())
    }
}

/// Listing source whose first page request fails outright.
#[derive(Debug)]
struct FailingListStore;

#[async_trait]
impl VersionStore for FailingListStore {
    async fn next_page(&self, _cursor: Option<&PageCursor>) -> Result<VersionPage, StoreError> {
        Err(StoreError::List("listing is broken".to_string()))
    }

    async fn delete_versions(&self, _batch: &[ObjectVersionId]) -> Result<(), StoreError> {
        panic!("delete must not be reached when listing fails");
    }
}

fn marker(key: &str, version_id: &str) -> ObjectVersionId {
    ObjectVersionId {
        key: key.to_string(),
        version_id: version_id.to_string(),
    }
}

fn numbered_markers(count: usize) -> Vec<ObjectVersionId> {
    (0..count)
        .map(|n| marker(&format!("key-{n:05}"), &format!("version-{n:05}")))
        .collect()
}

fn test_config(extraction_workers: usize, deletion_workers: usize) -> Configuration {
    Configuration {
        bucket: "test-bucket".to_string(),
        extraction_workers,
        deletion_workers,
        ..Default::default()
    }
}

#[tokio::test]
async fn three_markers_on_two_pages_become_one_batch() {
    let store = Arc::new(FakeVersionStore::with_pages(vec![
        vec![marker("k1", "v1"), marker("k2", "v2"), marker("k3", "v3")],
        vec![],
    ]));
    let config = test_config(2, 1);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.pages_listed, 2);
    assert_eq!(summary.markers_found, 3);
    assert_eq!(summary.batches_submitted, 1);
    assert_eq!(summary.batches_failed, 0);
    assert_eq!(summary.markers_deleted, 3);
    assert_eq!(summary.markers_dropped, 0);

    let batches = store.recorded_batches().await;
    assert_eq!(batches.len(), 1);
    let mut batch = batches[0].clone();
    batch.sort();
    assert_eq!(
        batch,
        vec![marker("k1", "v1"), marker("k2", "v2"), marker("k3", "v3")]
    );
}

#[tokio::test]
async fn batches_split_at_the_api_limit() {
    // 2500 markers across uneven pages, one deletion worker: exactly three
    // batches of 1000, 1000, and 500.
    let markers = numbered_markers(2500);
    let pages: Vec<Vec<ObjectVersionId>> =
        markers.chunks(700).map(|chunk| chunk.to_vec()).collect();
    let store = Arc::new(FakeVersionStore::with_pages(pages));
    let config = test_config(4, 1);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.markers_found, 2500);
    assert_eq!(summary.markers_deleted, 2500);
    assert_eq!(summary.batches_submitted, 3);

    let batches = store.recorded_batches().await;
    let mut sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert!(sizes.iter().all(|size| *size <= MAX_DELETE_BATCH));

    // Completeness: every marker submitted exactly once, none invented.
    let submitted: Vec<ObjectVersionId> = batches.into_iter().flatten().collect();
    assert_eq!(submitted.len(), 2500);
    let unique: HashSet<ObjectVersionId> = submitted.into_iter().collect();
    assert_eq!(unique, markers.into_iter().collect::<HashSet<_>>());
}

#[tokio::test]
async fn markers_spread_across_the_deletion_pool() {
    let markers = numbered_markers(10);
    let store = Arc::new(FakeVersionStore::with_pages(vec![markers.clone()]));
    let config = test_config(2, 4);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.markers_deleted, 10);

    // Idle workers flush empty batches, which must never reach the store.
    let batches = store.recorded_batches().await;
    assert!(batches.iter().all(|batch| !batch.is_empty()));
    assert!(batches.len() <= 4);
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn empty_bucket_makes_no_delete_calls() {
    // Re-running against a bucket with no markers left is a clean no-op.
    let store = Arc::new(FakeVersionStore::with_pages(vec![vec![]]));
    let config = test_config(8, 16);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.pages_listed, 1);
    assert_eq!(summary.markers_found, 0);
    assert_eq!(summary.batches_submitted, 0);
    assert_eq!(summary.markers_deleted, 0);
    assert_eq!(store.delete_calls(), 0);
}

#[tokio::test]
async fn failed_batch_is_dropped_and_the_run_completes() {
    let store = Arc::new(FakeVersionStore::failing_first(
        vec![numbered_markers(5)],
        1,
    ));
    let config = test_config(1, 1);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("best-effort deletion never aborts the run");

    assert_eq!(summary.markers_found, 5);
    assert_eq!(summary.batches_failed, 1);
    assert_eq!(summary.markers_dropped, 5);
    assert_eq!(summary.markers_deleted, 0);
    assert_eq!(store.delete_calls(), 1);
}

#[tokio::test]
async fn retry_policy_recovers_a_transient_failure() {
    let store = Arc::new(FakeVersionStore::failing_first(
        vec![numbered_markers(5)],
        1,
    ));
    let mut config = test_config(1, 1);
    config.retry.max_retries = 1;
    config.retry.backoff = Duration::from_millis(10);

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.markers_deleted, 5);
    assert_eq!(summary.batches_failed, 0);
    assert_eq!(summary.markers_dropped, 0);
    assert_eq!(store.delete_calls(), 2);
}

#[tokio::test]
async fn dry_run_issues_no_delete_calls() {
    let store = Arc::new(FakeVersionStore::with_pages(vec![numbered_markers(42)]));
    let mut config = test_config(2, 2);
    config.dry_run = true;

    let summary = UndeletePipeline::new(store.clone(), &config)
        .run()
        .await
        .expect("pipeline should complete");

    assert_eq!(summary.markers_found, 42);
    // Dry run counts what would have been deleted.
    assert_eq!(summary.markers_deleted, 42);
    assert_eq!(store.delete_calls(), 0);
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let config = test_config(2, 2);

    let result = UndeletePipeline::new(Arc::new(FailingListStore), &config)
        .run()
        .await;

    match result {
        Err(StoreError::List(message)) => assert!(message.contains("listing is broken")),
        other => panic!("expected a fatal listing error, got {other:?}"),
    }
}
