//! Dataset publishing: JSON artifact + QuickSight manifest to S3, with
//! read-after-write confirmation.
//!
//! The protocol for every dataset is the same four steps:
//!
//! 1. Serialize the record list to pretty-printed JSON and stage it in the
//!    local scratch directory.
//! 2. PutObject to `quicksight/<name>.json`, overwriting any prior run's
//!    object (fixed keys make repeated runs last-writer-wins idempotent).
//! 3. Poll HeadObject with a fixed delay and attempt budget until the
//!    object is visible. Exhausting the budget is fatal — the reconciler
//!    assumes every manifest it binds is readable.
//! 4. Build the manifest pointing at the object's public URL, stage and
//!    upload it to `quicksight/<name>_manifest.json`, and confirm it the
//!    same way.
//!
//! The two uploads are not transactional: a crash between steps 2 and 4 can
//! leave a data object with a stale or missing manifest. The next full run
//! overwrites both.

use aws_sdk_s3::primitives::ByteStream;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PostureError, Result};

/// Key prefix shared by every published artifact.
const KEY_PREFIX: &str = "quicksight";

/// Delay between existence-poll attempts.
const POLL_DELAY: Duration = Duration::from_secs(2);

/// Existence-poll attempt budget per object.
const POLL_MAX_ATTEMPTS: u32 = 20;

/// QuickSight S3 manifest document.
///
/// Shape is fixed by the QuickSight ingestion contract:
/// `{fileLocations: [{URIs: [...]}], globalUploadSettings: {format: "JSON"}}`.
#[derive(Debug, Clone, Serialize)]
pub struct QuicksightManifest {
    /// Exactly one location entry per dataset.
    #[serde(rename = "fileLocations")]
    pub file_locations: Vec<FileLocation>,
    /// Format declaration for the ingestion engine.
    #[serde(rename = "globalUploadSettings")]
    pub global_upload_settings: GlobalUploadSettings,
}

/// One entry in `fileLocations`.
#[derive(Debug, Clone, Serialize)]
pub struct FileLocation {
    /// Exactly one URI, pointing at the dataset's JSON object.
    #[serde(rename = "URIs")]
    pub uris: Vec<String>,
}

/// The `globalUploadSettings` block.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalUploadSettings {
    /// Always `"JSON"` for these datasets.
    pub format: String,
}

impl QuicksightManifest {
    /// Builds the manifest for a dataset object at the given bucket/region.
    pub fn for_dataset(bucket: &str, region: &str, name: &str) -> Self {
        QuicksightManifest {
            file_locations: vec![FileLocation {
                uris: vec![format!(
                    "https://{bucket}.s3.{region}.amazonaws.com/{KEY_PREFIX}/{name}.json"
                )],
            }],
            global_upload_settings: GlobalUploadSettings {
                format: "JSON".to_string(),
            },
        }
    }
}

/// Handle to a confirmed, published dataset. Consumed by the QuickSight
/// reconciler.
#[derive(Debug, Clone)]
pub struct PublishedDataset {
    /// Dataset name (e.g. `processed_machines`).
    pub name: String,
    /// Object key of the JSON array.
    pub object_key: String,
    /// Object key of the manifest document.
    pub manifest_key: String,
}

/// Publishes dataset/manifest pairs to a fixed reporting bucket.
pub struct ArtifactPublisher {
    s3: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    scratch_dir: PathBuf,
}

impl ArtifactPublisher {
    /// Creates a publisher targeting `bucket` in `region`, staging files
    /// under `scratch_dir`.
    pub fn new(
        s3: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        region: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        ArtifactPublisher {
            s3,
            bucket: bucket.into(),
            region: region.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Publishes one dataset: data object then manifest, each staged,
    /// uploaded, and confirmed visible.
    pub async fn publish<T: Serialize>(
        &self,
        name: &str,
        records: &[T],
    ) -> Result<PublishedDataset> {
        let object_key = format!("{KEY_PREFIX}/{name}.json");
        let data = serde_json::to_vec_pretty(records)?;
        self.stage_and_upload(&format!("{name}.json"), &object_key, data)
            .await?;

        let manifest_key = format!("{KEY_PREFIX}/{name}_manifest.json");
        let manifest = QuicksightManifest::for_dataset(&self.bucket, &self.region, name);
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        self.stage_and_upload(&format!("{name}_manifest.json"), &manifest_key, manifest_bytes)
            .await?;

        info!(
            dataset = %name,
            records = records.len(),
            key = %object_key,
            "dataset and manifest published"
        );
        Ok(PublishedDataset {
            name: name.to_string(),
            object_key,
            manifest_key,
        })
    }

    /// Writes `bytes` to the scratch directory, uploads the file to `key`,
    /// and polls until the object is visible.
    async fn stage_and_upload(&self, file_name: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let scratch_path = self.scratch_dir.join(file_name);
        tokio::fs::write(&scratch_path, &bytes).await?;

        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)?;

        self.wait_for_object(key).await
    }

    /// Bridges S3's read-after-write consistency gap: HEAD the key until it
    /// resolves. 404 means "not visible yet" and retries; any other error
    /// propagates immediately.
    async fn wait_for_object(&self, key: &str) -> Result<()> {
        for attempt in 1..=POLL_MAX_ATTEMPTS {
            match self
                .s3
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => {
                    debug!(key = %key, attempt, "object confirmed visible");
                    return Ok(());
                }
                Err(err) => {
                    let service_err = err.into_service_error();
                    if !service_err.is_not_found() {
                        return Err(aws_sdk_s3::Error::from(service_err).into());
                    }
                }
            }
            tokio::time::sleep(POLL_DELAY).await;
        }

        Err(PostureError::ConsistencyTimeout {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            attempts: POLL_MAX_ATTEMPTS,
        })
    }
}
