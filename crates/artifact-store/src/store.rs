//! The object-store accessor for batch job artifacts.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use rda_common::{RdaError, RdaResult};
use rda_client::ProgressFn;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// The object-store protocol deletes at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Configuration for the artifact store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStoreConfig {
    /// S3-compatible endpoint URL; empty uses the provider default.
    pub endpoint: Option<String>,
    /// Bucket holding the customer data.
    pub bucket: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region (use "us-east-1" for most S3-compatible stores).
    pub region: String,
    /// Allow plain HTTP (for local test stores).
    pub allow_http: bool,
    /// The account prefix all artifact keys live under.
    pub account_prefix: String,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: "customer-data".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: "us-east-1".to_string(),
            allow_http: false,
            account_prefix: String::new(),
        }
    }
}

/// Accessor for the batch artifacts in the customer data bucket.
pub struct ArtifactStore {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) account_prefix: String,
    pub(crate) progress: ProgressFn,
}

impl ArtifactStore {
    /// Create an accessor from config.
    pub fn new(config: &ArtifactStoreConfig) -> RdaResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| RdaError::Storage(format!("failed to create S3 client: {}", e)))?;

        Ok(Self::with_store(
            Arc::new(store),
            &config.account_prefix,
        ))
    }

    /// Create an accessor over any object store implementation. Tests use
    /// this with an in-memory store.
    pub fn with_store(store: Arc<dyn ObjectStore>, account_prefix: &str) -> Self {
        Self {
            store,
            account_prefix: account_prefix.trim_matches('/').to_string(),
            progress: Arc::new(|| {}),
        }
    }

    /// Set a callback fired whenever an artifact finishes downloading.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    fn rda_prefix(&self) -> String {
        format!("{}/rda", self.account_prefix)
    }

    pub(crate) fn job_prefix(&self, job_id: &str) -> String {
        format!("{}/rda/{}", self.account_prefix, job_id)
    }

    /// All the job ids that appear under the account's `rda/` prefix.
    #[instrument(skip(self))]
    pub async fn job_ids(&self) -> RdaResult<Vec<String>> {
        let prefix = StorePath::from(self.rda_prefix());
        let listing = self
            .store
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| RdaError::Storage(format!("failed listing job ids: {}", e)))?;

        let job_ids = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.parts().last().map(|part| part.as_ref().to_string()))
            .collect();
        Ok(job_ids)
    }

    /// Every object key under the given job id, stripped of the account
    /// prefix.
    #[instrument(skip(self))]
    pub async fn job_objects(&self, job_id: &str) -> RdaResult<Vec<String>> {
        let strip = format!("{}/rda/", self.account_prefix);
        let keys = self.list_job_artifacts(job_id).await?;
        Ok(keys
            .iter()
            .map(|key| {
                let full = key.to_string();
                full.strip_prefix(&strip).map(str::to_string).unwrap_or(full)
            })
            .collect())
    }

    /// Delete every artifact associated with the job id, in batches of up
    /// to 1000 (an object-store protocol limit). Returns the count deleted.
    #[instrument(skip(self))]
    pub async fn delete_job_artifacts(&self, job_id: &str) -> RdaResult<usize> {
        let keys = self.list_job_artifacts(job_id).await?;

        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let locations =
                stream::iter(chunk.iter().cloned().map(Ok::<_, object_store::Error>)).boxed();
            let results: Vec<StorePath> = self
                .store
                .delete_stream(locations)
                .try_collect()
                .await
                .map_err(|e| {
                    RdaError::Storage(format!(
                        "failed deleting artifacts for job {}: {}",
                        job_id, e
                    ))
                })?;
            deleted += results.len();
        }

        debug!(job_id, deleted, "deleted job artifacts");
        Ok(deleted)
    }

    /// List the raw artifact keys for a job id, walking every listing page.
    pub(crate) async fn list_job_artifacts(&self, job_id: &str) -> RdaResult<Vec<StorePath>> {
        let prefix = StorePath::from(self.job_prefix(job_id));
        let mut keys = Vec::new();

        let mut pages = self.store.list(Some(&prefix));
        while let Some(meta) = pages.try_next().await.map_err(|e| {
            RdaError::Storage(format!("failed listing artifacts for job {}: {}", job_id, e))
        })? {
            keys.push(meta.location);
        }

        Ok(keys)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    pub(crate) async fn seeded_store(objects: &[&str]) -> ArtifactStore {
        let mem = Arc::new(InMemory::new());
        for key in objects {
            mem.put(&StorePath::from(*key), Bytes::from_static(b"artifact").into())
                .await
                .unwrap();
        }
        ArtifactStore::with_store(mem, "acct-123")
    }

    #[tokio::test]
    async fn test_job_ids() {
        let store = seeded_store(&[
            "acct-123/rda/job-a/out.tif",
            "acct-123/rda/job-a/out.tfw",
            "acct-123/rda/job-b/part/0.tif",
            "acct-123/other/ignored.txt",
        ])
        .await;

        let mut ids = store.job_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["job-a", "job-b"]);
    }

    #[tokio::test]
    async fn test_job_ids_listing_is_idempotent() {
        let store = seeded_store(&["acct-123/rda/job-a/out.tif"]).await;
        let first = store.job_ids().await.unwrap();
        let second = store.job_ids().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_job_objects_strip_account_prefix() {
        let store = seeded_store(&[
            "acct-123/rda/job-a/out.tif",
            "acct-123/rda/job-a/meta/info.json",
        ])
        .await;

        let mut objects = store.job_objects("job-a").await.unwrap();
        objects.sort();
        assert_eq!(objects, vec!["job-a/meta/info.json", "job-a/out.tif"]);
    }

    #[tokio::test]
    async fn test_delete_job_artifacts() {
        let store = seeded_store(&[
            "acct-123/rda/job-a/out.tif",
            "acct-123/rda/job-a/out.tfw",
            "acct-123/rda/job-b/kept.tif",
        ])
        .await;

        let deleted = store.delete_job_artifacts("job-a").await.unwrap();
        assert_eq!(deleted, 2);

        assert!(store.job_objects("job-a").await.unwrap().is_empty());
        assert_eq!(store.job_objects("job-b").await.unwrap().len(), 1);
    }
}
