//! Watch mode: poll a batch job and greedily download artifacts as they
//! arrive, until the job completes.

use std::path::Path;
use std::time::Duration;

use rda_common::{RdaError, RdaResult};
use rda_client::batch::{fetch_job_status, JOB_STATE_COMPLETE, JOB_STATE_PROCESSING};
use rda_client::{Endpoints, HttpClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::store::ArtifactStore;

/// How long to wait between status polls when nothing is downloadable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Watch `job_id` until it completes, downloading artifacts into `out_dir`
/// as they appear. After the job reports complete, one more listing sweep
/// catches late-arriving objects. Any state other than processing or
/// complete fails with [`RdaError::BadJobState`]. Cancellation stops the
/// watch without an error; rerunning picks up where it left off.
#[instrument(skip(store, client, endpoints, out_dir, cancel), fields(out_dir = %out_dir.display()))]
pub async fn watch_job(
    store: &ArtifactStore,
    client: &HttpClient,
    endpoints: &Endpoints,
    out_dir: &Path,
    job_id: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> RdaResult<()> {
    let mut state = JOB_STATE_PROCESSING.to_string();

    loop {
        let plan = store.plan_downloads(out_dir, job_id).await?;

        if !plan.is_empty() {
            info!(pending = plan.num_pending(), "downloading artifacts");
            match plan.run(cancel).await {
                Ok(()) => continue,
                Err(err) if err.is_cancelled() => {
                    info!("watch cancelled; rerun to pick up where you left off");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        if state == JOB_STATE_COMPLETE {
            // Nothing left to download and the job is done.
            return Ok(());
        }

        let job = match fetch_job_status(client, endpoints, job_id, cancel).await {
            Ok(job) => job,
            Err(err) if err.is_cancelled() => {
                info!("watch cancelled; rerun to pick up where you left off");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        state = job.status.state.clone();

        match state.as_str() {
            // Loop once more to sweep any late-arriving objects.
            JOB_STATE_COMPLETE => continue,
            JOB_STATE_PROCESSING => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => {
                        info!("watch cancelled; rerun to pick up where you left off");
                        return Ok(());
                    }
                }
            }
            other => {
                return Err(RdaError::BadJobState {
                    job_id: job_id.to_string(),
                    state: other.to_string(),
                })
            }
        }
    }
}
