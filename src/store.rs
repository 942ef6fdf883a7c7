use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};

/// Hard limit of entries per `DeleteObjects` call.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Identifies one version of one key, including a delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectVersionId {
    pub key: String,
    pub version_id: String,
}

/// Continuation token for the version listing. `ListObjectVersions` resumes
/// from a key marker and a version-id marker pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of the version listing. Live versions are filtered out at the
/// store boundary; only delete markers are carried. `next` is `None` on the
/// last page.
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub delete_markers: Vec<ObjectVersionId>,
    pub next: Option<PageCursor>,
}

/// Error types that can occur against the version store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("listing request failed: {0}")]
    List(String),

    #[error("bulk delete request failed: {0}")]
    Delete(String),
}

/// Paginated version listing plus its sibling bulk-delete call. The pipeline
/// only talks to this trait, so tests drive it with a scripted fake.
#[async_trait]
pub trait VersionStore: Send + Sync + 'static {
    /// Fetch the page after `cursor`, or the first page when `cursor` is
    /// `None`. Only one enumeration may be in flight; pagination is ordered
    /// and stateful.
    async fn next_page(&self, cursor: Option<&PageCursor>) -> Result<VersionPage, StoreError>;

    /// Delete up to [`MAX_DELETE_BATCH`] object versions in one round trip.
    async fn delete_versions(&self, batch: &[ObjectVersionId]) -> Result<(), StoreError>;
}

/// `VersionStore` backed by the S3 API for a single bucket and optional key
/// prefix.
#[derive(Debug, Clone)]
pub struct S3VersionStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3VersionStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, prefix: Option<String>) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }
}

#[async_trait]
impl VersionStore for S3VersionStore {
    async fn next_page(&self, cursor: Option<&PageCursor>) -> Result<VersionPage, StoreError> {
        let mut request = self.client.list_object_versions().bucket(&self.bucket);
        if let Some(prefix) = &self.prefix {
            request = request.prefix(prefix);
        }
        if let Some(cursor) = cursor {
            request = request
                .set_key_marker(cursor.key_marker.clone())
                .set_version_id_marker(cursor.version_id_marker.clone());
        }

        let output = request
            .send()
            .await
            .map_err(|err| StoreError::List(DisplayErrorContext(&err).to_string()))?;

        // Entries missing a key or version id cannot be addressed by the
        // delete API and are skipped.
        let delete_markers = output
            .delete_markers()
            .iter()
            .filter_map(|marker| match (marker.key(), marker.version_id()) {
                (Some(key), Some(version_id)) => Some(ObjectVersionId {
                    key: key.to_string(),
                    version_id: version_id.to_string(),
                }),
                _ => None,
            })
            .collect();

        let next = output.is_truncated().unwrap_or(false).then(|| PageCursor {
            key_marker: output.next_key_marker().map(str::to_string),
            version_id_marker: output.next_version_id_marker().map(str::to_string),
        });

        Ok(VersionPage {
            delete_markers,
            next,
        })
    }

    async fn delete_versions(&self, batch: &[ObjectVersionId]) -> Result<(), StoreError> {
        debug_assert!(batch.len() <= MAX_DELETE_BATCH);

        let objects = batch
            .iter()
            .map(|id| {
                ObjectIdentifier::builder()
                    .key(&id.key)
                    .version_id(&id.version_id)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::Delete(err.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|err| StoreError::Delete(err.to_string()))?;

        // Quiet mode: per-key failures inside an otherwise successful call
        // are not inspected. Re-running the tool picks up surviving markers.
        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| StoreError::Delete(DisplayErrorContext(&err).to_string()))?;

        Ok(())
    }
}
