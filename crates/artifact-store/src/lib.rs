//! Object-store access to RDA batch materialization artifacts.
//!
//! Artifacts of job `J` live under `{bucket}/{account-prefix}/rda/{J}/...`.
//! [`ArtifactStore`] lists job ids and objects, deletes artifacts, and plans
//! resumable downloads; [`watch_job`] interleaves status polling with
//! downloads until a job completes.

pub mod download;
pub mod store;
pub mod watch;

pub use download::DownloadPlan;
pub use store::{ArtifactStore, ArtifactStoreConfig};
pub use watch::watch_job;
