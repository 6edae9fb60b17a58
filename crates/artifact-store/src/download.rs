//! Resumable artifact downloads: plan what's missing, then run the plan.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use rda_common::{RdaError, RdaResult};
use rda_client::ProgressFn;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::store::ArtifactStore;

/// One artifact to fetch.
#[derive(Debug, Clone)]
struct PlannedDownload {
    key: StorePath,
    dest: PathBuf,
}

/// The set of artifacts a job still needs downloaded. Built by
/// [`ArtifactStore::plan_downloads`]; running it is a separate step so
/// callers can size a progress bar off [`DownloadPlan::num_pending`] first.
pub struct DownloadPlan {
    store: Arc<dyn ObjectStore>,
    items: Vec<PlannedDownload>,
    progress: ProgressFn,
}

impl ArtifactStore {
    /// List the job's artifacts and work out which are missing from
    /// `out_dir` (created if absent). Artifacts already on disk are skipped,
    /// which makes plan-then-run idempotent and resumable.
    #[instrument(skip(self, out_dir), fields(out_dir = %out_dir.display()))]
    pub async fn plan_downloads(&self, out_dir: &Path, job_id: &str) -> RdaResult<DownloadPlan> {
        fs::create_dir_all(out_dir).await?;

        let strip = format!("{}/rda/", self.account_prefix);
        let mut items = Vec::new();
        for key in self.list_job_artifacts(job_id).await? {
            let full = key.to_string();
            let Some(rel) = full.strip_prefix(&strip) else {
                continue;
            };

            // Drop the job id from the output path; if nothing remains the
            // "job id" was really a full path to one file, so keep its file
            // name.
            let base = rel
                .strip_prefix(job_id)
                .unwrap_or(rel)
                .trim_start_matches('/');
            let base = if base.is_empty() {
                match rel.rsplit('/').next() {
                    Some(name) => name,
                    None => continue,
                }
            } else {
                base
            };

            let dest = base
                .split('/')
                .filter(|part| !part.is_empty())
                .fold(out_dir.to_path_buf(), |path, part| path.join(part));
            if fs::metadata(&dest).await.is_ok() {
                debug!(path = %dest.display(), "artifact already on disk, skipping");
                continue;
            }

            items.push(PlannedDownload { key, dest });
        }

        debug!(job_id, pending = items.len(), "planned downloads");
        Ok(DownloadPlan {
            store: self.store.clone(),
            items,
            progress: self.progress.clone(),
        })
    }
}

impl DownloadPlan {
    /// Number of artifacts the run will fetch.
    pub fn num_pending(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Download the planned artifacts sequentially, firing the progress
    /// callback per item. Partially written files are removed before an
    /// error surfaces, so re-planning and re-running picks up cleanly.
    pub async fn run(&self, cancel: &CancellationToken) -> RdaResult<()> {
        let progress: &(dyn Fn() + Send + Sync) = self.progress.as_ref();
        for item in &self.items {
            if cancel.is_cancelled() {
                return Err(RdaError::Cancelled);
            }

            if let Some(parent) = item.dest.parent() {
                fs::create_dir_all(parent).await?;
            }

            if let Err(err) = self.fetch_one(item, cancel).await {
                return Err(remove_partial(&item.dest, err).await);
            }
            progress();
        }

        info!(count = self.items.len(), "downloaded artifacts");
        Ok(())
    }

    async fn fetch_one(&self, item: &PlannedDownload, cancel: &CancellationToken) -> RdaResult<()> {
        let result = tokio::select! {
            r = self.store.get(&item.key) => r,
            _ = cancel.cancelled() => return Err(RdaError::Cancelled),
        };
        let get = result
            .map_err(|e| RdaError::Storage(format!("failed fetching {}: {}", item.key, e)))?;

        let mut file = fs::File::create(&item.dest).await?;
        let mut body = get.into_stream();
        loop {
            let chunk = tokio::select! {
                c = body.next() => c,
                _ = cancel.cancelled() => return Err(RdaError::Cancelled),
            };
            match chunk {
                Some(Ok(chunk)) => file.write_all(&chunk).await?,
                Some(Err(e)) => {
                    return Err(RdaError::Storage(format!(
                        "failed reading {}: {}",
                        item.key, e
                    )))
                }
                None => break,
            }
        }
        file.flush().await?;
        Ok(())
    }
}

/// Remove a partially written file, composing any removal failure into the
/// originating error.
async fn remove_partial(path: &Path, err: RdaError) -> RdaError {
    match fs::remove_file(path).await {
        Ok(()) => err,
        Err(remove_err) => RdaError::Storage(format!(
            "{}; additionally failed removing partial file {}: {}",
            err,
            path.display(),
            remove_err
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::seeded_store;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_plan_and_run() {
        let store = seeded_store(&[
            "acct-123/rda/job-a/out.tif",
            "acct-123/rda/job-a/meta/info.json",
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let plan = store.plan_downloads(dir.path(), "job-a").await.unwrap();
        assert_eq!(plan.num_pending(), 2);
        plan.run(&cancel).await.unwrap();

        assert!(dir.path().join("out.tif").exists());
        assert!(dir.path().join("meta/info.json").exists());
    }

    #[tokio::test]
    async fn test_replanning_after_a_run_is_empty() {
        let store = seeded_store(&["acct-123/rda/job-a/out.tif"]).await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let plan = store.plan_downloads(dir.path(), "job-a").await.unwrap();
        assert_eq!(plan.num_pending(), 1);
        plan.run(&cancel).await.unwrap();

        let again = store.plan_downloads(dir.path(), "job-a").await.unwrap();
        assert_eq!(again.num_pending(), 0);
    }

    #[tokio::test]
    async fn test_progress_fires_per_artifact() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        let store = seeded_store(&[
            "acct-123/rda/job-a/1.tif",
            "acct-123/rda/job-a/2.tif",
            "acct-123/rda/job-a/3.tif",
        ])
        .await
        .with_progress(Arc::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        }));

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let plan = store.plan_downloads(dir.path(), "job-a").await.unwrap();
        plan.run(&cancel).await.unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_cancelled_run_surfaces_the_sentinel() {
        let store = seeded_store(&["acct-123/rda/job-a/out.tif"]).await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let plan = store.plan_downloads(dir.path(), "job-a").await.unwrap();
        cancel.cancel();
        let err = plan.run(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dir.path().join("out.tif").exists());
    }

    #[tokio::test]
    async fn test_job_id_naming_a_single_file() {
        let store = seeded_store(&["acct-123/rda/job-a/out.tif"]).await;
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        // Passing the full path as the "job id" downloads just that file.
        let plan = store
            .plan_downloads(dir.path(), "job-a/out.tif")
            .await
            .unwrap();
        assert_eq!(plan.num_pending(), 1);
        plan.run(&cancel).await.unwrap();
        assert!(dir.path().join("out.tif").exists());
    }
}
