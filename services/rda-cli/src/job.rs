//! Batch job subcommands: status, downloadable, download, watch, rm.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use artifact_store::watch::DEFAULT_POLL_INTERVAL;
use clap::Subcommand;
use rda_client::fetch_batch_status;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ConfigArgs;

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Get the status of batch materialization job(s); with no arguments,
    /// job ids are read line-separated from stdin
    Status {
        /// Job ids to status
        job_ids: Vec<String>,
    },

    /// List job ids found in the customer data bucket, or the objects of
    /// one job
    Downloadable {
        /// A job id to list the objects of
        job_id: Option<String>,
    },

    /// Download a job's artifacts to the output directory
    Download {
        /// Directory to download into; created if absent
        out_dir: PathBuf,
        /// The job id to download
        job_id: String,
    },

    /// Watch a job until completion, greedily downloading artifacts as
    /// they arrive
    Watch {
        /// Directory to download into; created if absent
        out_dir: PathBuf,
        /// The job id to watch
        job_id: String,
    },

    /// Remove the artifacts associated with a job id from the bucket
    Rm {
        /// The job id to remove
        job_id: String,
    },
}

pub async fn run(command: JobCommand, config: &ConfigArgs, cancel: &CancellationToken) -> Result<()> {
    match command {
        JobCommand::Status { mut job_ids } => {
            if job_ids.is_empty() {
                for line in std::io::stdin().lock().lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        job_ids.push(line.trim().to_string());
                    }
                }
            }

            let client = config.http_client()?;
            let endpoints = config.endpoints()?;
            let jobs = fetch_batch_status(&client, &endpoints, &job_ids, cancel).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }

        JobCommand::Downloadable { job_id } => {
            let store = config.artifact_store()?;
            match job_id {
                None => {
                    let job_ids = store.job_ids().await?;
                    println!("{}", serde_json::to_string_pretty(&job_ids)?);
                }
                Some(job_id) => {
                    let objects = store.job_objects(&job_id).await?;
                    println!("{}", serde_json::to_string_pretty(&objects)?);
                }
            }
            Ok(())
        }

        JobCommand::Download { out_dir, job_id } => {
            let (store, counter) = store_with_progress(config)?;
            let plan = store.plan_downloads(&out_dir, &job_id).await?;
            if plan.is_empty() {
                println!("no artifacts to download");
                return Ok(());
            }

            let total = plan.num_pending();
            let start = Instant::now();
            match plan.run(cancel).await {
                Ok(()) => {
                    info!(
                        count = total,
                        elapsed = ?start.elapsed(),
                        "artifact download finished"
                    );
                    Ok(())
                }
                Err(err) if err.is_cancelled() => {
                    info!(
                        done = counter.load(Ordering::Relaxed),
                        total,
                        "download interrupted; rerun the command to pick up where you left off"
                    );
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }

        JobCommand::Watch { out_dir, job_id } => {
            let (store, _) = store_with_progress(config)?;
            let client = config.http_client()?;
            let endpoints = config.endpoints()?;
            artifact_store::watch_job(
                &store,
                &client,
                &endpoints,
                &out_dir,
                &job_id,
                DEFAULT_POLL_INTERVAL,
                cancel,
            )
            .await?;
            Ok(())
        }

        JobCommand::Rm { job_id } => {
            let store = config.artifact_store()?;
            let deleted = store.delete_job_artifacts(&job_id).await?;
            info!(deleted, job_id, "removed job artifacts");
            Ok(())
        }
    }
}

/// An artifact store that logs a line per downloaded artifact.
fn store_with_progress(
    config: &ConfigArgs,
) -> Result<(artifact_store::ArtifactStore, Arc<AtomicU64>)> {
    let counter = Arc::new(AtomicU64::new(0));
    let progress = counter.clone();
    let store = config.artifact_store()?.with_progress(Arc::new(move || {
        let n = progress.fetch_add(1, Ordering::Relaxed) + 1;
        info!(done = n, "downloaded artifact");
    }));
    Ok((store, counter))
}
