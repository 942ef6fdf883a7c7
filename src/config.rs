use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Retry policy for failed bulk-delete submissions.
///
/// Best-effort deletion is the default: a batch that fails is dropped with a
/// warning. Removing a delete marker is idempotent, so bounded re-submission
/// is safe for callers who want stronger guarantees.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first failed submission
    pub max_retries: u32,
    /// Pause between attempts
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Region the bucket is in
    pub region: String,
    /// Bucket to undelete from (required)
    pub bucket: String,
    /// Only remove markers under this key prefix; unset means the whole bucket
    pub prefix: Option<String>,
    /// Marker-extraction worker count
    pub extraction_workers: usize,
    /// Delete-batching worker count
    pub deletion_workers: usize,
    /// Retry policy for bulk-delete submissions
    pub retry: RetryConfig,
    /// Count markers without issuing any delete calls
    pub dry_run: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            region: String::from("us-east-1"),
            bucket: String::new(),
            prefix: None,
            extraction_workers: 8,
            deletion_workers: 16,
            retry: RetryConfig::default(),
            dry_run: false,
        }
    }
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("s3-undelete.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<figment::providers::Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("S3_UNDELETE__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Validate configuration before a run is started
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.is_empty() {
            anyhow::bail!("Bucket cannot be empty");
        }

        if self.extraction_workers == 0 {
            anyhow::bail!("Extraction worker count must be at least 1");
        }

        if self.deletion_workers == 0 {
            anyhow::bail!("Deletion worker count must be at least 1");
        }

        Ok(())
    }
}
