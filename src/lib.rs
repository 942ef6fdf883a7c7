//! Restores a versioned S3 bucket to its pre-deletion state by removing the
//! delete markers the service inserts on logical deletes. Prior object bytes
//! are untouched; removing a marker simply makes the previous version current
//! again.
//!
//! The work happens in a concurrent pipeline: a sequential pagination driver
//! feeds listing pages to a pool of marker-extraction workers, which forward
//! `(key, version id)` identifiers to a pool of delete-batching workers. Each
//! batching worker accumulates identifiers into batches of at most 1000 (the
//! `DeleteObjects` hard limit) and submits them best-effort. The run
//! completes once every batching worker has flushed its final partial batch.
//!
//! The S3 calls sit behind the [`store::VersionStore`] trait so the pipeline
//! can be driven against a fake store in tests.

pub mod config;
pub mod pipeline;
pub mod store;

pub use config::{Configuration, RetryConfig};
pub use pipeline::{UndeletePipeline, UndeleteSummary};
pub use store::{
    MAX_DELETE_BATCH, ObjectVersionId, PageCursor, S3VersionStore, StoreError, VersionPage,
    VersionStore,
};
